mod common;

use common::*;

const STACK_SUM: &str = "\
.globals 1
.def main: args=0, locals=1
sconst \"sum\"
print
iconst 0
gstore 0
iconst 1
store 0
loop:
load 0
iconst 5
ilt
brf done
gload 0
load 0
iadd
gstore 0
load 0
iconst 1
iadd
store 0
br loop
done:
gload 0
print
halt
";

const REGISTER_SUM: &str = "\
.globals 1
.def main: args=0, locals=5
sconst r1, \"sum\"
print r1
iconst r2, 0
iconst r3, 1
iconst r4, 5
iconst r5, 1
loop:
ilt r3, r4, r1
brf r1, done
iadd r2, r3, r2
iadd r3, r5, r3
br loop
done:
gstore r2, 0
print r2
halt
";

#[test]
fn both_engines_agree_on_a_loop() {
    let stack = run(STACK_SUM, MachineKind::Stack);
    let register = run(REGISTER_SUM, MachineKind::Register);

    assert_eq!(stack.status(), VmStatus::Halted);
    assert_eq!(register.status(), VmStatus::Halted);
    assert_eq!(stack.output(), "sum\n10\n");
    assert_eq!(stack.output(), register.output());
    assert_eq!(stack.engine.globals(), register.engine.globals());
    let strings = |constants: &[Constant]| {
        constants
            .iter()
            .filter(|constant| matches!(constant, Constant::Str(_)))
            .cloned()
            .collect::<Vec<_>>()
    };
    assert_eq!(
        strings(stack.engine.constants()),
        vec![Constant::Str("sum".to_string())]
    );
    assert_eq!(
        strings(stack.engine.constants()),
        strings(register.engine.constants())
    );
}

#[test]
fn both_engines_agree_on_calls() {
    let stack = run(
        "\
.def main: args=0, locals=0
fconst 1.5
call half()
print
halt
.def half: args=1, locals=0
load 0
fconst 0.5
fmul
ret
",
        MachineKind::Stack,
    );
    let register = run(
        "\
.def main: args=0, locals=1
fconst r1, 1.5
call half(), r1
print r0
halt
.def half: args=1, locals=1
fconst r2, 0.5
fmul r1, r2, r0
ret
",
        MachineKind::Register,
    );
    assert_eq!(stack.output(), "0.75\n");
    assert_eq!(stack.output(), register.output());
}

#[test]
fn both_engines_reject_the_same_type_error() {
    let stack = run("cconst 'a'\niconst 1\niadd\nhalt\n", MachineKind::Stack);
    let register = run(
        "cconst r1, 'a'\niconst r2, 1\niadd r1, r2, r3\nhalt\n",
        MachineKind::Register,
    );
    let expected = VmError::TypeMismatch {
        expected: "int",
        found: "char",
    };
    assert_eq!(stack.fault().error, expected);
    assert_eq!(register.fault().error, expected);
}

#[test]
fn engine_is_chosen_by_image_kind() {
    let stack = assemble_clean("halt\n", MachineKind::Stack);
    let register = assemble_clean("halt\n", MachineKind::Register);
    assert_eq!(
        new_engine(stack.image, EngineConfig::captured()).kind(),
        MachineKind::Stack
    );
    assert_eq!(
        new_engine(register.image, EngineConfig::captured()).kind(),
        MachineKind::Register
    );
}
