use std::{env, fs, process::ExitCode, time::Instant};

use pysst::{BuildOptions, LineIndex, Module, NoopTracer, SstError, SstTracer, StderrTracer, build_with, render};

#[derive(Debug, Default)]
struct Args {
    file: Option<String>,
    scopes: bool,
    json: bool,
    trace: bool,
    dump: Option<String>,
    load: Option<String>,
}

fn main() -> ExitCode {
    let args = match parse_args(env::args().skip(1)) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("error: {err}");
            eprintln!("usage: pysst [--scopes] [--json] [--trace] [--dump <out>] (<file.py> | --load <in>)");
            return ExitCode::FAILURE;
        }
    };
    if args.trace {
        run(&args, &mut StderrTracer::new())
    } else {
        run(&args, &mut NoopTracer)
    }
}

fn parse_args(mut raw: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut args = Args::default();
    while let Some(arg) = raw.next() {
        match arg.as_str() {
            "--scopes" => args.scopes = true,
            "--json" => args.json = true,
            "--trace" => args.trace = true,
            "--dump" => args.dump = Some(raw.next().ok_or("--dump needs an output path")?),
            "--load" => args.load = Some(raw.next().ok_or("--load needs an input path")?),
            flag if flag.starts_with("--") => return Err(format!("unknown flag {flag}")),
            _ if args.file.is_none() => args.file = Some(arg),
            _ => return Err(format!("unexpected argument {arg}")),
        }
    }
    if args.file.is_none() == args.load.is_none() {
        return Err("pass exactly one of a source file or --load".to_owned());
    }
    Ok(args)
}

fn run(args: &Args, tracer: &mut impl SstTracer) -> ExitCode {
    let start = Instant::now();
    let module = if let Some(path) = &args.load {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                eprintln!("error reading {path}: {err}");
                return ExitCode::FAILURE;
            }
        };
        match Module::load_with(&bytes, tracer) {
            Ok(module) => module,
            Err(err) => {
                eprintln!("{path}: {}: {}", err.category(), err.message());
                return ExitCode::FAILURE;
            }
        }
    } else {
        let Some(path) = &args.file else {
            return ExitCode::FAILURE;
        };
        let code = match read_file(path) {
            Ok(code) => code,
            Err(err) => {
                eprintln!("error: {err}");
                return ExitCode::FAILURE;
            }
        };
        match build_with(&code, &BuildOptions::default(), tracer) {
            Ok(module) => module,
            Err(err) => {
                report(path, &code, &err);
                return ExitCode::FAILURE;
            }
        }
    };
    eprintln!("built in {:?}", start.elapsed());

    if let Some(out) = &args.dump {
        let bytes = match module.dump_with(tracer) {
            Ok(bytes) => bytes,
            Err(err) => {
                eprintln!("error encoding: {err}");
                return ExitCode::FAILURE;
            }
        };
        if let Err(err) = fs::write(out, &bytes) {
            eprintln!("error writing {out}: {err}");
            return ExitCode::FAILURE;
        }
        eprintln!("wrote {} bytes to {out}", bytes.len());
    }

    if args.json {
        match render::render_json(&module) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                eprintln!("error: {err}");
                return ExitCode::FAILURE;
            }
        }
    } else if args.scopes {
        print!("{}", render::render_scopes(&module.scopes));
    } else {
        print!("{}", render::render_module(&module));
    }
    ExitCode::SUCCESS
}

/// Prints `file:line:col: category: message`.
fn report(path: &str, code: &str, err: &SstError) {
    let index = LineIndex::new(code);
    match index.span_start(err.span()) {
        Some(loc) => eprintln!("{path}:{loc}: {}: {}", err.category(), err.message()),
        None => eprintln!("{path}: {}: {}", err.category(), err.message()),
    }
}

fn read_file(file_path: &str) -> Result<String, String> {
    match fs::metadata(file_path) {
        Ok(metadata) if !metadata.is_file() => return Err(format!("{file_path} is not a file")),
        Ok(_) => {}
        Err(err) => return Err(format!("reading {file_path}: {err}")),
    }
    fs::read_to_string(file_path).map_err(|err| format!("reading {file_path}: {err}"))
}
