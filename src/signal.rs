//! Cooperative interrupt handling.
//!
//! SIGINT/SIGTERM only raise a flag; long-running flows poll it between
//! sequential steps and bail out with [`Error::Interrupted`].

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use anyhow::{anyhow, Context};
use tracing::warn;

use crate::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    raised: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a process-wide SIGINT/SIGTERM handler that raises this flag.
    /// A second signal exits immediately, e.g. while blocked on a prompt.
    pub fn install(&self) -> Result<()> {
        let raised = self.raised.clone();
        ctrlc::set_handler(move || {
            if raised.swap(true, Ordering::SeqCst) {
                warn!("second interrupt; exiting now");
                std::process::exit(130);
            }
            warn!("interrupt received; stopping after the current step");
        })
        .context("failed to install SIGINT/SIGTERM handler")?;
        Ok(())
    }

    /// The flag wired to the process signal handler. The handler is
    /// installed on first use; later calls share the same flag.
    pub fn process() -> Result<Self> {
        static PROCESS_FLAG: Mutex<Option<CancelFlag>> = Mutex::new(None);

        let mut slot = PROCESS_FLAG
            .lock()
            .map_err(|_| anyhow!("process cancel flag lock poisoned"))?;
        if let Some(flag) = slot.as_ref() {
            return Ok(flag.clone());
        }
        let flag = Self::new();
        flag.install()?;
        *slot = Some(flag.clone());
        Ok(flag)
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Checkpoint between steps.
    pub fn check(&self) -> Result<()> {
        if self.is_raised() {
            return Err(Error::Interrupted.into());
        }
        Ok(())
    }
}
