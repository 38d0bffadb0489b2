use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use tracing::{debug, info, warn};
use vm::logging;
use vm::{
    Engine, EngineConfig, MachineKind, ProgramImage, VmStatus, assemble, decode_program,
    encode_program, new_engine, render_diagnostics, render_vm_error, validate_program,
};

#[cfg(feature = "cli")]
use rustyline::DefaultEditor;
#[cfg(feature = "cli")]
use rustyline::error::ReadlineError;

const IMAGE_EXTENSION: &str = "rsbc";

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliConfig {
    source: Option<String>,
    engine: MachineKind,
    trace: bool,
    dis: bool,
    dump: bool,
    strict: bool,
    max_steps: Option<u64>,
    stack_size: usize,
    call_depth: usize,
    emit: Option<PathBuf>,
    emit_json: Option<PathBuf>,
    repl: bool,
    help: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            source: None,
            engine: MachineKind::Register,
            trace: false,
            dis: false,
            dump: false,
            strict: false,
            max_steps: None,
            stack_size: EngineConfig::DEFAULT_OPERAND_STACK_SIZE,
            call_depth: EngineConfig::DEFAULT_CALL_STACK_SIZE,
            emit: None,
            emit_json: None,
            repl: false,
            help: false,
        }
    }
}

impl CliConfig {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            trace: self.trace,
            operand_stack_size: self.stack_size,
            call_stack_size: self.call_depth,
            step_budget: self.max_steps,
            ..EngineConfig::default()
        }
    }
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli_args(&args).map_err(io::Error::other)?;
    if cli.help {
        print_usage();
        return Ok(ExitCode::SUCCESS);
    }
    logging::init()?;

    if cli.repl {
        return run_repl(&cli).map(|()| ExitCode::SUCCESS);
    }

    let Some(image) = load_image(&cli)? else {
        return Ok(ExitCode::FAILURE);
    };

    if cli.emit.is_some() || cli.emit_json.is_some() {
        emit_image(&cli, &image)?;
        return Ok(ExitCode::SUCCESS);
    }

    let mut engine = new_engine(image, cli.engine_config());
    let outcome = engine.run();
    let code = match &outcome {
        Ok(status) => {
            info!(
                "{} finished: {status:?} after {} steps",
                logging::category_engine(engine.kind().name()),
                engine.steps()
            );
            ExitCode::SUCCESS
        }
        Err(fault) => {
            eprintln!("{}", render_vm_error(fault, logging::ansi_enabled()));
            ExitCode::FAILURE
        }
    };
    if cli.dis {
        print!("{}", engine.disassemble());
    }
    if cli.dump {
        print!("{}", engine.core_dump());
    }
    Ok(code)
}

/// Produces the image to run, or None when assembly diagnostics gate
/// execution. Diagnostics are written to stderr.
fn load_image(cli: &CliConfig) -> Result<Option<ProgramImage>, Box<dyn std::error::Error>> {
    if let Some(path) = cli.source.as_deref()
        && has_image_extension(Path::new(path))
    {
        let bytes = std::fs::read(path)?;
        let image = decode_program(&bytes)?;
        validate_program(&image)?;
        if image.machine != cli.engine {
            warn!(
                "{path} targets the {} machine; ignoring --engine {}",
                image.machine, cli.engine
            );
        }
        return Ok(Some(image));
    }

    let source = read_source(cli.source.as_deref())?;
    Ok(assemble_checked(&source, cli.engine, cli.strict))
}

fn assemble_checked(source: &str, machine: MachineKind, strict: bool) -> Option<ProgramImage> {
    let assembly = assemble(source, machine);
    if !assembly.diagnostics.is_empty() {
        eprintln!(
            "{}",
            render_diagnostics(&assembly.diagnostics, source, logging::ansi_enabled())
        );
    }
    debug!(
        "{} {} syntax / {} semantic diagnostics",
        logging::category_assembler(),
        assembly.syntax_error_count(),
        assembly.semantic_error_count()
    );
    if assembly.has_syntax_errors() {
        eprintln!(
            "{} syntax error(s); not executing",
            assembly.syntax_error_count()
        );
        return None;
    }
    if strict && !assembly.is_clean() {
        eprintln!(
            "{} error(s) with --strict; not executing",
            assembly.diagnostics.len()
        );
        return None;
    }
    Some(assembly.image)
}

fn read_source(path: Option<&str>) -> Result<String, io::Error> {
    match path {
        Some("-") | None => {
            let mut source = String::new();
            io::stdin().read_to_string(&mut source)?;
            Ok(source)
        }
        Some(path) => std::fs::read_to_string(path),
    }
}

fn emit_image(cli: &CliConfig, image: &ProgramImage) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(path) = &cli.emit {
        let bytes = encode_program(image)?;
        std::fs::write(path, bytes)?;
        info!("wrote {} bytes to {}", image.code.len(), path.display());
    }
    if let Some(path) = &cli.emit_json {
        std::fs::write(path, image.to_json()?)?;
        info!("wrote json image to {}", path.display());
    }
    Ok(())
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(IMAGE_EXTENSION))
}

fn parse_cli_args(args: &[String]) -> Result<CliConfig, String> {
    let mut cfg = CliConfig::default();
    let mut index = 0usize;

    while index < args.len() {
        match args[index].as_str() {
            "-h" | "--help" => {
                cfg.help = true;
                index += 1;
            }
            "--engine" => {
                let raw = flag_value(args, index, "--engine")?;
                cfg.engine = MachineKind::parse(raw)
                    .ok_or_else(|| format!("invalid --engine value '{raw}'"))?;
                index += 2;
            }
            "--trace" => {
                cfg.trace = true;
                index += 1;
            }
            "--dis" => {
                cfg.dis = true;
                index += 1;
            }
            "--dump" => {
                cfg.dump = true;
                index += 1;
            }
            "--strict" => {
                cfg.strict = true;
                index += 1;
            }
            "--max-steps" => {
                cfg.max_steps = Some(parse_number(args, index, "--max-steps")?);
                index += 2;
            }
            "--stack-size" => {
                cfg.stack_size = parse_number(args, index, "--stack-size")?;
                index += 2;
            }
            "--call-depth" => {
                cfg.call_depth = parse_number(args, index, "--call-depth")?;
                index += 2;
            }
            "--emit" => {
                cfg.emit = Some(PathBuf::from(flag_value(args, index, "--emit")?));
                index += 2;
            }
            "--emit-json" => {
                cfg.emit_json = Some(PathBuf::from(flag_value(args, index, "--emit-json")?));
                index += 2;
            }
            "--repl" => {
                cfg.repl = true;
                index += 1;
            }
            "-" => {
                set_source(&mut cfg, "-")?;
                index += 1;
            }
            value if value.starts_with('-') => {
                return Err(format!("unknown flag '{value}'"));
            }
            path => {
                set_source(&mut cfg, path)?;
                index += 1;
            }
        }
    }

    Ok(cfg)
}

fn set_source(cfg: &mut CliConfig, path: &str) -> Result<(), String> {
    if cfg.source.is_some() {
        return Err("multiple source paths provided".to_string());
    }
    cfg.source = Some(path.to_string());
    Ok(())
}

fn flag_value<'a>(args: &'a [String], index: usize, flag: &str) -> Result<&'a str, String> {
    args.get(index + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("missing value for {flag}"))
}

fn parse_number<T: std::str::FromStr>(
    args: &[String],
    index: usize,
    flag: &str,
) -> Result<T, String> {
    let raw = flag_value(args, index, flag)?;
    raw.parse::<T>()
        .map_err(|_| format!("invalid {flag} value '{raw}'"))
}

fn print_usage() {
    println!("Usage:");
    println!("  regstack-vm [options] [source.asm | image.rsbc | -]");
    println!("  regstack-vm --repl [--engine stack|register]");
    println!();
    println!("Options:");
    println!("  --engine stack|register  execution model (default: register)");
    println!("  --trace                  print each instruction with machine state");
    println!("  --dis                    print a disassembly after the run");
    println!("  --dump                   print a core dump after the run");
    println!("  --strict                 refuse to run when any diagnostic was reported");
    println!("  --max-steps <n>          abort after n instructions");
    println!("  --stack-size <n>         operand stack capacity (default: 100)");
    println!("  --call-depth <n>         call stack depth (default: 1000)");
    println!("  --emit <path>            write a binary image instead of running");
    println!("  --emit-json <path>       write the image as JSON instead of running");
}

#[cfg(not(feature = "cli"))]
fn run_repl(_cli: &CliConfig) -> Result<(), Box<dyn std::error::Error>> {
    Err(Box::new(io::Error::other(
        "the REPL requires the 'cli' feature",
    )))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplAction {
    Continue,
    Break,
}

struct ReplSession {
    lines: Vec<String>,
    machine: MachineKind,
    config: EngineConfig,
    strict: bool,
    last_run: Option<Box<dyn Engine>>,
}

impl ReplSession {
    fn new(cli: &CliConfig) -> Self {
        Self {
            lines: Vec::new(),
            machine: cli.engine,
            config: cli.engine_config(),
            strict: cli.strict,
            last_run: None,
        }
    }

    fn source(&self) -> String {
        let mut source = self.lines.join("\n");
        source.push('\n');
        source
    }

    fn assemble(&self) -> Option<ProgramImage> {
        assemble_checked(&self.source(), self.machine, self.strict)
    }

    fn handle_command(&mut self, line: &str) -> ReplAction {
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or_default();
        let argument = parts.next();
        match (command, argument) {
            (":quit" | ":q", _) => return ReplAction::Break,
            (":help", _) => print_repl_help(),
            (":clear", _) => {
                self.lines.clear();
                self.last_run = None;
                println!("buffer cleared");
            }
            (":engine", Some(name)) => match MachineKind::parse(name) {
                Some(machine) => {
                    self.machine = machine;
                    println!("engine: {machine}");
                }
                None => println!("unknown engine '{name}'"),
            },
            (":engine", None) => println!("engine: {}", self.machine),
            (":trace", Some("on")) => self.config.trace = true,
            (":trace", Some("off")) => self.config.trace = false,
            (":trace", _) => println!("usage: :trace on|off"),
            (":dis", _) => {
                if let Some(image) = self.assemble() {
                    print!("{}", vm::disassemble_image(&image));
                }
            }
            (":run", _) => self.run(),
            (":dump", _) => match &self.last_run {
                Some(engine) => print!("{}", engine.core_dump()),
                None => println!("nothing has run yet"),
            },
            (other, _) => println!("unknown command '{other}', try :help"),
        }
        ReplAction::Continue
    }

    fn run(&mut self) {
        let Some(image) = self.assemble() else {
            return;
        };
        let mut engine = new_engine(image, self.config.clone());
        match engine.run() {
            Ok(VmStatus::Halted) => println!("=> halted"),
            Ok(VmStatus::EndOfCode) => println!("=> end of code"),
            Ok(VmStatus::Returned) => println!("=> returned"),
            Err(fault) => println!("{}", render_vm_error(&fault, false)),
        }
        self.last_run = Some(engine);
    }
}

fn print_repl_help() {
    println!("lines are appended to the program buffer");
    println!("  :run                  assemble and run the buffer");
    println!("  :dis                  disassemble the buffer");
    println!("  :dump                 core dump of the last run");
    println!("  :engine stack|register");
    println!("  :trace on|off");
    println!("  :clear                empty the buffer");
    println!("  :quit");
}

#[cfg(feature = "cli")]
fn run_repl(cli: &CliConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("regstack-vm REPL ({} machine)", cli.engine);
    println!("history: up/down arrows, commands: :help, :quit");
    let mut editor = DefaultEditor::new()?;
    let mut session = ReplSession::new(cli);
    loop {
        match editor.readline("asm> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(trimmed);
                if trimmed.starts_with(':') {
                    debug!("{} command {trimmed}", logging::category_repl());
                    if session.handle_command(trimmed) == ReplAction::Break {
                        break;
                    }
                    continue;
                }
                session.lines.push(line);
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("bye");
                break;
            }
            Err(err) => {
                return Err(Box::new(io::Error::other(err.to_string())));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(value: &str) -> String {
        value.to_string()
    }

    #[test]
    fn parse_cli_defaults() {
        let cfg = parse_cli_args(&[]).expect("parse should succeed");
        assert_eq!(cfg.engine, MachineKind::Register);
        assert!(!cfg.trace);
        assert!(!cfg.strict);
        assert!(cfg.max_steps.is_none());
        assert_eq!(cfg.stack_size, 100);
        assert_eq!(cfg.call_depth, 1000);
        assert!(cfg.source.is_none());
    }

    #[test]
    fn parse_cli_engine_and_source() {
        let cfg = parse_cli_args(&[s("--engine"), s("stack"), s("--trace"), s("prog.asm")])
            .expect("parse should succeed");
        assert_eq!(cfg.engine, MachineKind::Stack);
        assert!(cfg.trace);
        assert_eq!(cfg.source.as_deref(), Some("prog.asm"));
    }

    #[test]
    fn parse_cli_numeric_limits() {
        let cfg = parse_cli_args(&[
            s("--max-steps"),
            s("500"),
            s("--stack-size"),
            s("8"),
            s("--call-depth"),
            s("4"),
        ])
        .expect("parse should succeed");
        assert_eq!(cfg.max_steps, Some(500));
        let engine = cfg.engine_config();
        assert_eq!(engine.operand_stack_size, 8);
        assert_eq!(engine.call_stack_size, 4);
        assert_eq!(engine.step_budget, Some(500));
    }

    #[test]
    fn parse_cli_rejects_bad_values() {
        let err = parse_cli_args(&[s("--engine"), s("tape")]).expect_err("parse should fail");
        assert!(err.contains("invalid --engine"));
        let err = parse_cli_args(&[s("--max-steps")]).expect_err("parse should fail");
        assert!(err.contains("missing value for --max-steps"));
        let err = parse_cli_args(&[s("--stack-size"), s("-3")]).expect_err("parse should fail");
        assert!(err.contains("invalid --stack-size"));
    }

    #[test]
    fn parse_cli_rejects_multiple_sources() {
        let err = parse_cli_args(&[s("a.asm"), s("b.asm")]).expect_err("parse should fail");
        assert!(err.contains("multiple source paths"));
    }

    #[test]
    fn image_extension_is_case_insensitive() {
        assert!(has_image_extension(Path::new("out/prog.RSBC")));
        assert!(!has_image_extension(Path::new("prog.asm")));
    }

    #[test]
    fn repl_commands_update_session() {
        let mut session = ReplSession::new(&CliConfig::default());
        assert_eq!(session.handle_command(":engine stack"), ReplAction::Continue);
        assert_eq!(session.machine, MachineKind::Stack);
        session.handle_command(":trace on");
        assert!(session.config.trace);
        session.lines.push(s("halt"));
        session.handle_command(":clear");
        assert!(session.lines.is_empty());
        assert_eq!(session.handle_command(":quit"), ReplAction::Break);
    }
}
