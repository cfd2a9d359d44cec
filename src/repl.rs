//! Line-oriented REPL.
//!
//! Globals persist between entries. Input with unbalanced braces keeps
//! reading continuation lines until the braces close. Lines starting with
//! `.` are REPL commands (`.help` lists them).

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use colored::Colorize;

use crate::error::LpcError;
use crate::vm::Vm;

const HISTORY_FILE: &str = ".lpcvm_history";

pub struct Repl {
    vm: Vm,
    history: Vec<String>,
    history_file: PathBuf,
    buffer: String,
    brace_balance: i32,
}

impl Repl {
    pub fn new(vm: Vm) -> Self {
        let mut repl = Self {
            vm,
            history: Vec::new(),
            history_file: Self::history_path(),
            buffer: String::new(),
            brace_balance: 0,
        };
        repl.load_history();
        repl
    }

    fn history_path() -> PathBuf {
        match dirs::home_dir() {
            Some(home) => home.join(HISTORY_FILE),
            None => PathBuf::from(HISTORY_FILE),
        }
    }

    fn load_history(&mut self) {
        if let Ok(content) = std::fs::read_to_string(&self.history_file) {
            self.history = content
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    fn save_history(&self) {
        let _ = std::fs::write(&self.history_file, self.history.join("\n"));
    }

    pub fn run(&mut self) {
        println!("lpcvm {} REPL", env!("CARGO_PKG_VERSION"));
        println!("Type .help for commands, exit or Ctrl-D to quit.\n");

        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();
        loop {
            let prompt = if self.buffer.is_empty() { "lpc> " } else { "...> " };
            print!("{}", prompt);
            let _ = io::stdout().flush();

            let line = match lines.next() {
                Some(Ok(line)) => line,
                Some(Err(_)) | None => break,
            };
            if self.buffer.is_empty() && line.trim() == "exit" {
                break;
            }
            if self.buffer.is_empty() && line.trim().is_empty() {
                continue;
            }
            if line.trim_start().starts_with('.') {
                self.handle_command(line.trim());
                continue;
            }

            self.history.push(line.clone());
            if let Some(source) = self.feed(&line) {
                if let Err(err) = self.execute(&source) {
                    eprintln!("{}", err.to_string().red());
                }
            }
        }

        self.save_history();
        println!("\nGoodbye!");
    }

    fn handle_command(&mut self, line: &str) {
        match line {
            ".help" => Self::cmd_help(),
            ".history" | ".hist" => print!("{}", self.history_listing()),
            ".break" | ".cancel" => {
                if self.cancel_entry() {
                    println!("Entry discarded.");
                } else {
                    println!("Not in multi-line mode.");
                }
            }
            ".load" => println!("Usage: .load <filename>"),
            _ if line.starts_with(".load ") => {
                let file = line[".load ".len()..].trim();
                if let Err(err) = crate::run_file(&mut self.vm, Path::new(file)) {
                    eprintln!("{}", err.to_string().red());
                }
            }
            _ => println!(
                "Unknown command: {}. Type .help for available commands.",
                line
            ),
        }
    }

    fn cmd_help() {
        println!("Commands:");
        println!("  .help            Show this list");
        println!("  .history, .hist  Show previous entries");
        println!("  .break           Discard an unfinished multi-line entry");
        println!("  .load <file>     Run a script file in this session");
        println!("  exit             Leave the REPL");
    }

    /// Numbered history, oldest first.
    pub fn history_listing(&self) -> String {
        let mut out = String::from("History:\n");
        for (i, entry) in self.history.iter().enumerate() {
            out.push_str(&format!("{:4}  {}\n", i + 1, entry));
        }
        out
    }

    /// Drop a partially typed entry. Returns false when there was none.
    pub fn cancel_entry(&mut self) -> bool {
        let pending = !self.buffer.is_empty();
        self.buffer.clear();
        self.brace_balance = 0;
        pending
    }

    /// Add a line of input. Returns the complete entry once braces balance.
    pub fn feed(&mut self, line: &str) -> Option<String> {
        for c in line.chars() {
            match c {
                '{' => self.brace_balance += 1,
                '}' => self.brace_balance -= 1,
                _ => {}
            }
        }
        if !self.buffer.is_empty() {
            self.buffer.push('\n');
        }
        self.buffer.push_str(line);

        if self.brace_balance > 0 {
            return None;
        }
        self.brace_balance = 0;
        let mut source = std::mem::take(&mut self.buffer);
        let trimmed = source.trim_end();
        // Let a bare expression be typed without its semicolon.
        if !trimmed.ends_with(';') && !trimmed.ends_with('}') {
            source.push(';');
        }
        Some(source)
    }

    /// Run one complete entry on the REPL's VM.
    pub fn execute(&mut self, source: &str) -> Result<(), LpcError> {
        crate::run_in(&mut self.vm, "repl", source)?;
        Ok(())
    }
}
