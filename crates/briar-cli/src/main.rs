//! The briardb interactive shell.
//!
//! Statements end with `;`. The prompt tracks transaction state: `dbms>`
//! in auto-commit, `dbms*>` inside an explicit transaction. `\q` exits.

mod connection;
mod formatter;

use anyhow::Result;
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use briar_common::constants::DEFAULT_PORT;
use connection::Connection;

/// briardb interactive shell
#[derive(Parser, Debug)]
#[command(name = "briar", version, about = "briardb client")]
struct Args {
    /// Server host
    #[arg(short = 'H', long, default_value = "127.0.0.1", env = "BRIAR_HOST")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "BRIAR_PORT")]
    port: u16,

    /// Execute one statement and exit
    #[arg(short = 'c', long)]
    command: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut connection = Connection::connect(&args.host, args.port)?;

    if let Some(command) = args.command {
        let response = connection.request(&command)?;
        print!("{}", formatter::render(&response));
        return Ok(());
    }

    println!("briardb shell — statements end with ';', \\q exits");
    let mut editor = DefaultEditor::new()?;
    let mut in_txn = false;
    let mut pending = String::new();

    loop {
        let prompt = if !pending.is_empty() {
            "   ...> "
        } else if in_txn {
            "dbms*> "
        } else {
            "dbms> "
        };
        match editor.readline(prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed == "\\q" || trimmed.eq_ignore_ascii_case("exit") {
                    break;
                }
                if trimmed.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(&line);

                pending.push_str(&line);
                pending.push('\n');
                let (statements, rest) = briar_server::split_statements(&pending);
                pending = rest;

                for statement in statements {
                    match connection.request(&statement) {
                        Ok(response) => {
                            in_txn = response.in_txn;
                            print!("{}", formatter::render(&response));
                        }
                        Err(error) => {
                            eprintln!("connection error: {}", error);
                            return Err(error);
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                pending.clear();
                println!("^C");
            }
            Err(ReadlineError::Eof) => break,
            Err(error) => {
                eprintln!("input error: {}", error);
                break;
            }
        }
    }
    println!("bye");
    Ok(())
}
