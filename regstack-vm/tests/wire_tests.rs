mod common;

use common::*;
use vm::{FunctionSymbol, ValidationError, WireError, decode_program, encode_program, validate_program};

const PROGRAM: &str = "\
.globals 2
.def main: args=0, locals=2
fconst r1, 0.5
sconst r2, \"ok\"
call show(), r2
halt
.def show: args=1, locals=0
print r1
ret
";

fn encoded() -> (ProgramImage, Vec<u8>) {
    let image = assemble_clean(PROGRAM, MachineKind::Register).image;
    let bytes = encode_program(&image).expect("encode");
    (image, bytes)
}

#[test]
fn decoded_image_matches_and_runs() {
    let (image, bytes) = encoded();
    assert_eq!(&bytes[..4], b"RSBC");
    let decoded = decode_program(&bytes).expect("decode");
    assert_eq!(decoded, image);
    validate_program(&decoded).expect("valid image");

    let mut engine = new_engine(decoded, EngineConfig::captured());
    assert_eq!(engine.run(), Ok(VmStatus::Halted));
    assert_eq!(engine.output().captured(), Some("ok\n"));
}

#[test]
fn header_fields_are_checked() {
    let (_, bytes) = encoded();

    let mut bad = bytes.clone();
    bad[0] = b'X';
    assert_eq!(decode_program(&bad), Err(WireError::InvalidMagic(*b"XSBC")));

    let mut bad = bytes.clone();
    bad[4] = 9;
    assert_eq!(decode_program(&bad), Err(WireError::UnsupportedVersion(9)));

    let mut bad = bytes.clone();
    bad[6] = 1;
    assert_eq!(decode_program(&bad), Err(WireError::UnsupportedFlags(1)));

    let mut bad = bytes;
    bad[8] = 7;
    assert_eq!(decode_program(&bad), Err(WireError::InvalidMachine(7)));
}

#[test]
fn unknown_constant_tag_is_rejected() {
    let (_, mut bytes) = encoded();
    // magic, version, flags, machine, data size, constant count
    bytes[4 + 2 + 2 + 1 + 4 + 4] = 9;
    assert_eq!(decode_program(&bytes), Err(WireError::InvalidConstantTag(9)));
}

#[test]
fn truncated_and_padded_payloads_are_rejected() {
    let (_, bytes) = encoded();
    assert_eq!(
        decode_program(&bytes[..bytes.len() - 1]),
        Err(WireError::UnexpectedEof)
    );
    let mut padded = bytes;
    padded.push(0);
    assert_eq!(decode_program(&padded), Err(WireError::TrailingBytes));
}

#[test]
fn validation_catches_undecodable_code() {
    let image = ProgramImage::new(MachineKind::Stack, vec![99], Vec::new());
    assert_eq!(
        validate_program(&image),
        Err(ValidationError::InvalidOpcode {
            offset: 0,
            opcode: 99
        })
    );

    let image = ProgramImage::new(MachineKind::Stack, vec![18, 0, 0], Vec::new());
    assert_eq!(
        validate_program(&image),
        Err(ValidationError::TruncatedOperand {
            offset: 0,
            opcode: 18,
            expected_bytes: 4
        })
    );

    let image = ProgramImage::new(MachineKind::Stack, vec![14, 0, 0, 0, 3, 31], Vec::new());
    assert_eq!(
        validate_program(&image),
        Err(ValidationError::InvalidJumpTarget {
            offset: 0,
            target: 3
        })
    );
}

#[test]
fn validation_checks_pool_references() {
    let image = ProgramImage::new(
        MachineKind::Stack,
        vec![12, 0, 0, 0, 0],
        vec![Constant::Float(1.0)],
    );
    assert_eq!(
        validate_program(&image),
        Err(ValidationError::NotAFunction {
            offset: 0,
            index: 0
        })
    );

    let image = ProgramImage::new(MachineKind::Stack, vec![20, 0, 0, 0, 4], Vec::new());
    assert_eq!(
        validate_program(&image),
        Err(ValidationError::InvalidConstant {
            offset: 0,
            index: 4
        })
    );

    let mut image = ProgramImage::new(MachineKind::Stack, vec![18, 0, 0, 0, 1], Vec::new());
    image.main = Some(FunctionSymbol::new("main", 0, 0, 2));
    assert_eq!(
        validate_program(&image),
        Err(ValidationError::InvalidEntry { address: 2 })
    );
}

#[test]
fn oversized_header_counts_are_rejected() {
    let (_, mut bytes) = encoded();
    // data size follows magic, version, flags and machine
    bytes[9..13].copy_from_slice(&u32::MAX.to_le_bytes());
    assert_eq!(
        decode_program(&bytes),
        Err(WireError::LengthTooLarge("data", u32::MAX as usize))
    );
}
