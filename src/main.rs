use malrs::ast::Value;
use malrs::evaluator::{self, Environment};
use malrs::{Arity, Error, printer, reader, readline};
use std::cell::Cell;
use std::rc::Rc;
use std::{process, thread};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{Registry, fmt, reload};

/// Evaluator thread stack, sized so the evaluation depth limit trips first
const EVAL_STACK_SIZE: usize = 256 * 1024 * 1024;

const BANNER: &str = r#"(println (str "Mal [" *host-language* "]"))"#;

/// Adjusts the stderr log level at runtime
type TraceHandle = reload::Handle<LevelFilter, Registry>;

/// Install the stderr subscriber, silent until `(trace-eval)` is called
fn init_tracing() -> Option<TraceHandle> {
    let (filter, handle) = reload::Layer::new(LevelFilter::OFF);
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .without_time()
                .with_target(false),
        )
        .try_init()
        .ok()?;
    Some(handle)
}

fn main() {
    let trace = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let spawned = thread::Builder::new()
        .name("malrs-eval".into())
        .stack_size(EVAL_STACK_SIZE)
        .spawn(move || run(&args, trace));

    let handle = match spawned {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error: could not start the evaluator thread: {e}");
            process::exit(1);
        }
    };

    match handle.join() {
        Ok(code) => process::exit(code),
        Err(panic_info) => {
            eprintln!("The interpreter encountered an unexpected error and must exit.");

            if let Some(msg) = panic_info.downcast_ref::<&str>() {
                eprintln!("Error: {msg}");
            } else if let Some(msg) = panic_info.downcast_ref::<String>() {
                eprintln!("Error: {msg}");
            } else {
                eprintln!("Error: Unknown panic occurred");
            }

            process::exit(1);
        }
    }
}

/// `malrs` starts the REPL; `malrs FILE ARGS...` runs FILE with `*ARGV*` bound to ARGS
fn run(args: &[String], trace: Option<TraceHandle>) -> i32 {
    let (script, argv) = match args.split_first() {
        Some((file, rest)) => (Some(file.as_str()), rest),
        None => (None, &[][..]),
    };

    let env = match evaluator::create_global_env_with_argv(argv) {
        Ok(env) => env,
        Err(e) => {
            eprintln!("Error: {e}");
            return 1;
        }
    };

    match script {
        Some(path) => run_script(path, &env),
        None => {
            run_repl(&env, trace);
            0
        }
    }
}

fn run_script(path: &str, env: &Environment) -> i32 {
    let load = Value::list(vec![
        Value::symbol("load-file"),
        Value::String(path.to_owned()),
    ]);
    match evaluator::eval(&load, env) {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    }
}

/// REPL debug switches, each flipped by a zero-argument builtin
struct DebugFlags {
    show_ast: Rc<Cell<bool>>,
    show_env: Rc<Cell<bool>>,
}

impl DebugFlags {
    fn register(env: &Environment, trace: Option<TraceHandle>) -> Self {
        let show_ast = register_toggle(env, "show-ast", |_| {});
        let show_env = register_toggle(env, "show-env", |_| {});
        register_toggle(env, "trace-eval", move |enabled| {
            let level = if enabled {
                LevelFilter::TRACE
            } else {
                LevelFilter::OFF
            };
            if let Some(handle) = &trace {
                // A failed reload keeps the previous level
                let _ = handle.modify(|filter| *filter = level);
            }
        });
        DebugFlags { show_ast, show_env }
    }
}

/// Bind `name` to a builtin that flips a flag and returns its new value
fn register_toggle(
    env: &Environment,
    name: &str,
    on_change: impl Fn(bool) + 'static,
) -> Rc<Cell<bool>> {
    let flag = Rc::new(Cell::new(false));
    let state = Rc::clone(&flag);
    env.register_builtin_closure(name, Arity::Exact(0), move |_args| {
        let enabled = !state.get();
        state.set(enabled);
        on_change(enabled);
        Ok(Value::Bool(enabled))
    });
    flag
}

fn run_repl(env: &Environment, trace: Option<TraceHandle>) {
    let flags = DebugFlags::register(env, trace);

    if let Err(e) = malrs::rep(BANNER, env) {
        println!("Error: {e}");
    }

    loop {
        let line = match readline::read_line("user> ") {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("Error: {e}");
                break;
            }
        };

        match line.trim() {
            "" => continue,
            ":env" => {
                print_environment(env);
                continue;
            }
            ":quit" | ":exit" => break,
            _ => {}
        }

        match rep_with_flags(&line, env, &flags) {
            Ok(Some(output)) => println!("{output}"),
            Ok(None) => {}
            Err(e) => println!("Error: {e}"),
        }
    }
}

fn rep_with_flags(line: &str, env: &Environment, flags: &DebugFlags) -> Result<Option<String>, Error> {
    let Some(ast) = reader::read_str(line)? else {
        return Ok(None);
    };
    if flags.show_ast.get() {
        println!("AST: {ast:?}");
    }

    let result = evaluator::eval(&ast, env)?;

    if flags.show_env.get() {
        print_user_bindings(env);
    }
    Ok(Some(printer::pr_str(&result, true)))
}

fn print_user_bindings(env: &Environment) {
    for (name, value) in env.local_bindings() {
        if !matches!(value, Value::BuiltinFunction { .. }) {
            println!("  {name} = {}", printer::pr_str(&value, true));
        }
    }
}

fn print_environment(env: &Environment) {
    let bindings = env.get_all_bindings();

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    println!("Environment bindings ({} total):", bindings.len());
    println!();

    let mut builtins = Vec::new();
    let mut user_defined = Vec::new();

    for (name, value) in bindings {
        match value {
            Value::BuiltinFunction { .. } => builtins.push(name),
            _ => user_defined.push((name, value)),
        }
    }

    if !builtins.is_empty() {
        println!("Built-in functions ({}):", builtins.len());
        // Four columns
        let mut col = 0;
        for name in builtins {
            print!("  {name:<15}");
            col += 1;
            if col % 4 == 0 {
                println!();
            }
        }
        if col % 4 != 0 {
            println!();
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("User-defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {}", printer::pr_str(&value, true));
        }
    }
}
