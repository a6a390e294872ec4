//! Yes/no confirmation

use std::io::{self, BufRead, BufReader, Stdin, Stdout, Write};
use std::sync::Mutex;

pub trait Confirm: Send + Sync {
    fn confirm(&self, message: &str) -> bool;

    /// One aggregate confirmation for deleting `count` items; a single item
    /// needs no extra prompt.
    fn confirm_bulk(&self, count: usize, item: &str) -> bool {
        if count <= 1 {
            return true;
        }
        self.confirm(&format!("Delete {count} {item}s?"))
    }
}

/// Plain-text `[y/N]` prompt over any reader/writer pair.
pub struct TextPrompt<R, W> {
    io: Mutex<(R, W)>,
}

impl<R: BufRead + Send, W: Write + Send> TextPrompt<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new((reader, writer)),
        }
    }
}

impl TextPrompt<BufReader<Stdin>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R: BufRead + Send, W: Write + Send> Confirm for TextPrompt<R, W> {
    fn confirm(&self, message: &str) -> bool {
        let Ok(mut guard) = self.io.lock() else {
            return false;
        };
        let (reader, writer) = &mut *guard;

        if write!(writer, "{message} [y/N]: ").and_then(|_| writer.flush()).is_err() {
            return false;
        }

        let mut input = String::new();
        match reader.read_line(&mut input) {
            Ok(0) | Err(_) => false,
            Ok(_) => matches!(input.trim().to_lowercase().as_str(), "y" | "yes"),
        }
    }
}

/// Answers every prompt the same way. `AutoConfirm(true)` backs `--force`
/// style flows and tests.
#[derive(Debug, Clone, Copy)]
pub struct AutoConfirm(pub bool);

impl Confirm for AutoConfirm {
    fn confirm(&self, _message: &str) -> bool {
        self.0
    }
}
