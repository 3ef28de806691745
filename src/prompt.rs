//! Operator interaction seam.
//!
//! The core only ever shows text and asks blocking questions; how that
//! reaches a human is up to the [`Prompter`] implementation.

use std::io;

use dialoguer::{Confirm, Input};

use crate::{Error, Result};

pub trait Prompter {
    fn present(&mut self, text: &str);
    /// Blocks until the operator answers. There is no timeout.
    fn confirm(&mut self, question: &str) -> Result<bool>;
    /// Read one free-form line; `None` when no answer can be read.
    fn ask(&mut self, prompt: &str) -> Result<Option<String>>;
}

/// Terminal prompter built on `dialoguer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsolePrompter {
    assume_yes: bool,
}

impl ConsolePrompter {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

impl Prompter for ConsolePrompter {
    fn present(&mut self, text: &str) {
        println!("{}", text.trim_end());
    }

    fn confirm(&mut self, question: &str) -> Result<bool> {
        if self.assume_yes {
            self.present(&format!("{question} yes (--yes)"));
            return Ok(true);
        }
        // Escape or `q` dismisses the prompt; that is a "no".
        match Confirm::new()
            .with_prompt(question)
            .default(false)
            .interact_opt()
        {
            Ok(answer) => Ok(answer.unwrap_or(false)),
            Err(dialoguer::Error::IO(err)) if err.kind() == io::ErrorKind::NotConnected => {
                Err(Error::Cli(format!("{question:?} needs a terminal; pass --yes to confirm")).into())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn ask(&mut self, prompt: &str) -> Result<Option<String>> {
        match Input::<String>::new()
            .with_prompt(prompt.trim_end_matches([' ', ':']))
            .allow_empty(true)
            .interact_text()
        {
            Ok(line) => Ok(Some(line)),
            Err(dialoguer::Error::IO(err))
                if matches!(
                    err.kind(),
                    io::ErrorKind::NotConnected | io::ErrorKind::UnexpectedEof
                ) =>
            {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}
