use lispcore::ast::Value;
use lispcore::evaluator::{self, Environment};
use lispcore::reader::Reader;
use lispcore::{Error, ParseErrorKind};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::panic;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = panic::catch_unwind(|| {
        run_repl();
    });

    if let Err(panic_info) = result {
        eprintln!("The REPL encountered an unexpected error and must exit.");

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

fn run_repl() {
    println!("lispcore REPL");
    println!("Enter expressions like: (+ 1 2) or ({{:a 1 :b 2}} :b)");
    println!("Type :help for more commands, or Ctrl+C to exit.");
    println!();

    let mut rl = DefaultEditor::new().expect("Could not initialize REPL");
    let env = evaluator::create_global_env();

    // Register custom function that can be called from user code for demonstration purposes
    env.register_builtin_operation::<_, (), ()>("help", print_help);

    // Input that ended mid-form; the next line continues it
    let mut pending = String::new();

    loop {
        let prompt = if pending.is_empty() { "lisp> " } else { "  ... " };
        match rl.readline(prompt) {
            Ok(line) => {
                if pending.is_empty() {
                    let command = line.trim();
                    if command.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(command);

                    // Handle special commands
                    match command {
                        ":help" => {
                            print_help();
                            continue;
                        }
                        ":env" => {
                            print_environment(&env);
                            continue;
                        }
                        ":quit" | ":exit" => {
                            println!("Goodbye!");
                            break;
                        }
                        _ => {}
                    }
                } else {
                    let _ = rl.add_history_entry(line.trim());
                }

                pending.push_str(&line);
                pending.push('\n');

                if needs_more_input(&pending) {
                    continue;
                }
                eval_all(&pending, &env);
                pending.clear();
            }

            Err(ReadlineError::Interrupted) if !pending.is_empty() => {
                // Abandon the unfinished form
                pending.clear();
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

/// True when the input so far only fails because a form is unfinished.
fn needs_more_input(input: &str) -> bool {
    Reader::new(input).any(|form| {
        matches!(
            form,
            Err(Error::ParseError(ref err)) if err.kind == ParseErrorKind::Incomplete
        )
    })
}

/// Evaluate each form in `input`, printing every result. An error is reported and the
/// next form is evaluated.
fn eval_all(input: &str, env: &Environment) {
    for form in Reader::new(input) {
        match form.and_then(|expr| evaluator::eval(&expr, env)) {
            Ok(value) => println!("{value}"),
            Err(e) => println!("Error: {e}"),
        }
    }
}

fn print_help() {
    println!("lispcore commands:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show current environment bindings");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+C     - Abandon an unfinished form, or exit");
    println!();
    println!("Values:");
    println!("  Numbers: 42, -5, 2.5");
    println!("  Strings and characters: \"text\", \\a, \\newline");
    println!("  Keywords: :name");
    println!("  Collections: (list), [vector], {{:map \"literal\"}}");
    println!();
    println!("Special forms: quote, do, def, fn, defn, if, cond, and, or");
    println!("Primitives: + - * / < <= > >= = list not first rest cons count str");
    println!();
    println!("Examples:");
    println!("  (defn square [x] (* x x))");
    println!("  (square 12)");
    println!("  (cond (< 1 0) :neg :else :non-neg)");
    println!("  ({{:a {{:b 42}}}} :a :b)");
    println!();
}

fn print_environment(env: &Environment) {
    let bindings = env.get_all_bindings();

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    println!("Environment bindings ({} total):", bindings.len());
    println!();

    // Separate built-in functions from user-defined values
    let mut builtins = Vec::new();
    let mut user_defined = Vec::new();

    for (name, value) in bindings {
        match value {
            Value::Primitive(_) | Value::SpecialForm(_) | Value::Native(_) => builtins.push(name),
            _ => user_defined.push((name, value)),
        }
    }

    // Print built-in functions
    if !builtins.is_empty() {
        println!("Built-in functions ({}):", builtins.len());
        // Print in columns for readability
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

    // Print user-defined values
    if !user_defined.is_empty() {
        println!("User-defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}
