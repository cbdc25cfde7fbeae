//! The interactive GraniteDB shell.
//!
//! Reads semicolon-terminated statements, feeds them to the execute
//! engine, and renders results. Exits 0 on `quit`, non-zero on a fatal
//! storage failure.

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use granite_bin::errors::DbError;
use granite_bin::executor::ExecuteEngine;

fn main() {
    let data_dir = granite_bin::default_data_dir();
    let mut engine = match ExecuteEngine::new(&data_dir) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("failed to open data directory {}: {e}", data_dir.display());
            std::process::exit(1);
        }
    };
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("failed to initialize line editor: {e}");
            std::process::exit(1);
        }
    };

    println!("GraniteDB shell. Statements end with ';', 'quit;' leaves.");
    let mut pending = String::new();
    loop {
        let prompt = if pending.is_empty() {
            "granitedb > "
        } else {
            "        ... "
        };
        match editor.readline(prompt) {
            Ok(line) => {
                pending.push_str(&line);
                pending.push('\n');
                if !line.contains(';') {
                    continue;
                }
                let input = std::mem::take(&mut pending);
                if !input.trim().is_empty() {
                    let _ = editor.add_history_entry(input.trim());
                }
                match engine.execute_sql(&input) {
                    Ok(results) => {
                        for result in results {
                            println!("{}", result.render());
                        }
                    }
                    Err(DbError::Quit) => {
                        shutdown(&mut engine);
                        println!("Bye.");
                        return;
                    }
                    Err(DbError::Storage(e)) => {
                        // Recovery is out of scope: report and stop.
                        eprintln!("fatal storage failure: {e}");
                        shutdown(&mut engine);
                        std::process::exit(1);
                    }
                    Err(e) => println!("{e}"),
                }
            }
            Err(ReadlineError::Interrupted) => {
                pending.clear();
            }
            Err(ReadlineError::Eof) => {
                shutdown(&mut engine);
                println!("Bye.");
                return;
            }
            Err(e) => {
                eprintln!("input error: {e}");
                shutdown(&mut engine);
                std::process::exit(1);
            }
        }
    }
}

fn shutdown(engine: &mut ExecuteEngine) {
    if let Err(e) = engine.close_all() {
        eprintln!("error while closing databases: {e}");
    }
}
