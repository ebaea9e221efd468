//! A process wide generator.
//!
//! Sequence state has to be coherent per node, so a process normally owns a
//! single generator. Install it once at startup and reach it from anywhere.

use crate::error::Error;
use crate::generator::IdGenerator;
use std::sync::OnceLock;

static GENERATOR: OnceLock<Box<dyn IdGenerator>> = OnceLock::new();

/// Installs the process wide generator. Fails if one is already installed.
pub fn install(generator: Box<dyn IdGenerator>) -> Result<(), Error> {
    GENERATOR
        .set(generator)
        .map_err(|_| Error::InvalidConfiguration("a global generator is already installed".into()))
}

pub fn generator() -> Option<&'static dyn IdGenerator> {
    GENERATOR.get().map(|generator| generator.as_ref())
}

/// Generates an id with the process wide generator.
pub fn next_id() -> Result<String, Error> {
    generator()
        .ok_or_else(|| Error::InvalidConfiguration("no global generator installed".into()))?
        .id()
}
