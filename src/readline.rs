//! Line input shared by the REPL and the `readline` builtin.
//!
//! With the `readline` feature (the default) input goes through a `rustyline` editor that
//! keeps history for the life of the thread. Without it, lines are read from buffered stdin.

use crate::Error;

/// Print `prompt` and read one line without its trailing newline.
///
/// Returns `Ok(None)` at end of input, and for an interrupt (Ctrl-C) when line editing is on.
pub fn read_line(prompt: &str) -> Result<Option<String>, Error> {
    editor::read_line(prompt)
}

#[cfg(feature = "readline")]
mod editor {
    use crate::Error;
    use rustyline::DefaultEditor;
    use rustyline::error::ReadlineError;
    use std::cell::RefCell;

    thread_local! {
        static EDITOR: RefCell<Option<DefaultEditor>> = const { RefCell::new(None) };
    }

    fn io_error(err: ReadlineError) -> Error {
        Error::Io(format!("readline: {err}"))
    }

    pub(super) fn read_line(prompt: &str) -> Result<Option<String>, Error> {
        EDITOR.with(|cell| {
            let mut slot = cell.borrow_mut();
            let editor = match slot.take() {
                Some(editor) => editor,
                None => DefaultEditor::new().map_err(io_error)?,
            };
            let editor = slot.insert(editor);

            match editor.readline(prompt) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        // History is best effort
                        let _ = editor.add_history_entry(line.as_str());
                    }
                    Ok(Some(line))
                }
                Err(ReadlineError::Eof | ReadlineError::Interrupted) => Ok(None),
                Err(err) => Err(io_error(err)),
            }
        })
    }
}

#[cfg(not(feature = "readline"))]
mod editor {
    use crate::Error;
    use std::io::{self, BufRead, Write};

    fn io_error(err: io::Error) -> Error {
        Error::Io(format!("readline: {err}"))
    }

    pub(super) fn read_line(prompt: &str) -> Result<Option<String>, Error> {
        let mut stdout = io::stdout();
        write!(stdout, "{prompt}")
            .and_then(|()| stdout.flush())
            .map_err(io_error)?;

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).map_err(io_error)? == 0 {
            return Ok(None);
        }
        let trimmed_len = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(trimmed_len);
        Ok(Some(line))
    }
}
