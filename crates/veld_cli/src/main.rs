use std::io::{BufRead, Write};
use std::process::ExitCode;

use veld_compiler::CompileOptions;
use veld_runtime::{Config, ExecError, Runtime};
use veld_syntax::render_diagnostic;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const USAGE: &str = "Usage: veld [options] [script]
Options:
  -e <code>        run an inline code string
  -d, --dump       print disassembly before running
  --dump-only      print disassembly and exit
  -w, --warn       enable warnings
  -s, --strict     strict mode (assignments need declarations)
  -t, --trace      trace instruction execution
  --gcstart <n>    initial GC threshold in bytes (0 disables GC)
  -h, --help       show this help";

struct Options {
    script: Option<String>,
    inline: Option<String>,
    dump: bool,
    dump_only: bool,
    config: Config,
}

fn parse_args(argv: &[String]) -> Result<Options, String> {
    let mut opts = Options {
        script: None,
        inline: None,
        dump: false,
        dump_only: false,
        config: Config::default(),
    };
    let mut i = 0;
    while i < argv.len() {
        let arg = argv[i].as_str();
        match arg {
            "-e" => {
                i += 1;
                let code = argv.get(i).ok_or("missing argument to -e")?;
                opts.inline = Some(code.clone());
            }
            "-d" | "--dump" => opts.dump = true,
            "--dump-only" => {
                opts.dump = true;
                opts.dump_only = true;
            }
            "-w" | "--warn" => opts.config.enable_warnings = true,
            "-s" | "--strict" => opts.config.strict_globals = true,
            "-t" | "--trace" => opts.config.trace_execution = true,
            "--gcstart" => {
                i += 1;
                let n = argv.get(i).ok_or("missing argument to --gcstart")?;
                opts.config.gc_start = n
                    .parse()
                    .map_err(|_| format!("invalid --gcstart value '{n}'"))?;
            }
            "-h" | "--help" => return Err(USAGE.to_string()),
            _ => {
                if arg.starts_with('-') {
                    return Err(format!("unknown option '{arg}'\n{USAGE}"));
                }
                if opts.script.is_some() {
                    return Err(format!("unexpected extra argument '{arg}'"));
                }
                opts.script = Some(arg.to_string());
            }
        }
        i += 1;
    }
    Ok(opts)
}

fn report_exec_error(path: &str, err: ExecError) {
    match err {
        ExecError::Compile(diags) => {
            for diag in &diags {
                eprintln!("{}", render_diagnostic(path, diag));
            }
        }
        ExecError::Runtime(rendered) => {
            eprintln!("{rendered}");
        }
    }
}

fn run_source(rt: &mut Runtime, source: &str, path: &str) -> bool {
    match rt.interpret(source, path) {
        Ok(_) => true,
        Err(err) => {
            report_exec_error(path, err);
            false
        }
    }
}

fn dump_source(source: &str, path: &str) -> bool {
    match veld_compiler::compile(source, path) {
        Ok(proto) => {
            print!("{}", veld_bytecode::disassemble_blob(&proto.blob, &proto.name));
            true
        }
        Err(diags) => {
            for diag in &diags {
                eprintln!("{}", render_diagnostic(path, diag));
            }
            false
        }
    }
}

fn repl(config: Config) -> ExitCode {
    let mut rt = Runtime::with_config(config);
    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();
        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => return ExitCode::SUCCESS,
            Ok(_) => {}
            Err(_) => return ExitCode::SUCCESS,
        }
        let source = line.trim();
        if source.is_empty() {
            continue;
        }
        let options = CompileOptions { repl_echo: true };
        if let Err(err) = rt.interpret_with(source, "<repl>", options) {
            report_exec_error("<repl>", err);
        }
    }
}

fn main() -> ExitCode {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let opts = match parse_args(&argv) {
        Ok(opts) => opts,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::from(2);
        }
    };
    let (source, path) = if let Some(code) = &opts.inline {
        (code.clone(), "<cmdline>".to_string())
    } else if let Some(script) = &opts.script {
        match std::fs::read_to_string(script) {
            Ok(source) => (source, script.clone()),
            Err(err) => {
                eprintln!("cannot open {script}: {err}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        return repl(opts.config);
    };
    if opts.dump_only {
        return if dump_source(&source, &path) {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        };
    }
    let mut config = opts.config;
    config.dump_bytecode = opts.dump;
    let mut rt = Runtime::with_config(config);
    if run_source(&mut rt, &source, &path) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
