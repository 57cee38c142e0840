//! LS Bridge - Terminal host for a language-service session.
//!
//! Usage: ls-bridge [CONFIG] [FILE]
//!
//! Every line read from stdin is appended to the buffer and synchronized.
//! Lines starting with `:` are commands: `:show`, `:undo`, `:restart`,
//! `:organize`, `:key <chord>` and `:quit`.

use ls_bridge_core::{SessionConfig, TextBuffer};
use ls_bridge_session::{wait_for_result, Session, SessionEvent, SessionHandle};
use std::env;
use std::io::{self, BufRead};
use std::process;
use std::thread;

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting LS Bridge");

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let config = match args.get(1).filter(|path| path.as_str() != "-") {
        Some(path) => match SessionConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("Failed to load config '{}': {}", path, e);
                process::exit(1);
            }
        },
        None => SessionConfig::default(),
    };

    let mut buffer = match args.get(2) {
        Some(path) => {
            log::info!("Opening file: {}", path);
            match TextBuffer::from_file(path) {
                Ok(buffer) => buffer,
                Err(e) => {
                    log::error!("Failed to open file '{}': {}", path, e);
                    process::exit(1);
                }
            }
        }
        None => TextBuffer::from_str(config.initial_content.as_deref().unwrap_or_default()),
    };

    let config = config.with_initial_content(buffer.to_string());
    let mut session = match Session::start(config) {
        Ok(session) => session,
        Err(e) => {
            log::error!("Failed to start session: {}", e);
            process::exit(1);
        }
    };
    let handle = session.handle();
    log::info!(
        "Editor configuration: {}",
        session.editor_options().user_configuration()
    );

    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::error!("Failed to read stdin: {}", e);
                break;
            }
        };

        match line.trim_end() {
            ":quit" => break,
            ":show" => print!("{}", buffer.to_string()),
            ":undo" => {
                if buffer.pop_line().is_some() {
                    send_buffer(&handle, &buffer);
                }
            }
            ":restart" => run_command(&handle, "restartServer"),
            ":organize" => run_command(&handle, "organizeImports"),
            command if command.starts_with(":key ") => {
                let chord = command.trim_start_matches(":key ").trim();
                match session.command_for_key(chord) {
                    Some(id) => run_command(&handle, id),
                    None => println!("no command bound to {}", chord),
                }
            }
            text => {
                buffer.push_line(text);
                send_buffer(&handle, &buffer);
            }
        }

        print_events(&session);
    }

    session.shutdown();
    print_events(&session);
    log::info!("LS Bridge exited");
}

fn send_buffer(handle: &SessionHandle, buffer: &TextBuffer) {
    if let Err(e) = handle.buffer_changed(buffer.to_string()) {
        log::error!("Failed to send edit: {}", e);
    }
}

/// Runs a command and prints its result when it arrives.
fn run_command(handle: &SessionHandle, name: &str) {
    let name = name.to_string();
    match handle.execute_command(name.clone(), Vec::new()) {
        Ok(reply) => {
            thread::spawn(move || match wait_for_result(reply) {
                Ok(result) => println!("{} -> {}", name, result),
                Err(e) => println!("{} failed: {}", name, e),
            });
        }
        Err(e) => log::error!("Failed to run {}: {}", name, e),
    }
}

fn print_events(session: &Session) {
    while let Some(event) = session.try_recv_event() {
        match event {
            SessionEvent::StateChanged { state } => log::info!("Connection {}", state),
            SessionEvent::Ready {
                server_name,
                capabilities_summary,
            } => println!(
                "connected to {} ({})",
                server_name.as_deref().unwrap_or("language service"),
                capabilities_summary
            ),
            SessionEvent::Diagnostics { uri, diagnostics, .. } => {
                if diagnostics.is_empty() {
                    println!("{}: no problems", uri);
                }
                for diagnostic in diagnostics {
                    println!("{}:{}", uri, diagnostic);
                }
            }
            SessionEvent::LogMessage { level, message } => log::log!(log::Level::from(level), "{}", message),
            SessionEvent::ShowMessage { message, .. } => println!("{}", message),
            SessionEvent::Failure(report) => eprintln!("{}", report),
        }
    }
}
