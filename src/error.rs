use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("expression error: {0}")]
    Expr(String),

    #[error("memory error at {addr:#x}: {msg}")]
    Memory { addr: u64, msg: String },

    #[error("register error: {0}")]
    Register(String),

    #[error("ELF error: {0}")]
    Elf(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
