mod application;
mod presentation;

use satchel_core::error::SatchelError;
use tracing_subscriber::EnvFilter;

/// Process exit codes, stable for scripting. The full enumeration is
/// kept even where a kind is not currently produced.
#[derive(Clone, Copy)]
#[repr(i32)]
#[allow(dead_code)]
enum ExitStatus {
    Success = 0,
    StartupFailure = 1,
    InvalidInput = 2,
    InputError = 3,
    CipherError = 4,
    RequestFailed = 5,
    PanicInExecute = 6,
    ErrorReturnedToExecute = 7,
}

fn status_for(err: &SatchelError) -> ExitStatus {
    match err {
        SatchelError::UserCancelled => ExitStatus::Success,
        SatchelError::InvalidInput(_) | SatchelError::ConflictExists(_) => ExitStatus::InvalidInput,
        SatchelError::NotFound(_) => ExitStatus::StartupFailure,
        SatchelError::Io(_) | SatchelError::Format(_) => ExitStatus::InputError,
        SatchelError::Integrity(_)
        | SatchelError::SignatureInvalid(_)
        | SatchelError::Crypto(_) => ExitStatus::CipherError,
        SatchelError::NotPermitted(_) => ExitStatus::RequestFailed,
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let outcome = std::panic::catch_unwind(application::run);
    let status = match outcome {
        Ok(Ok(())) => ExitStatus::Success,
        Ok(Err(err)) => {
            eprintln!("satchel: {err}");
            status_for(&err)
        }
        Err(_) => {
            eprintln!("satchel: internal error");
            ExitStatus::PanicInExecute
        }
    };
    std::process::exit(status as i32);
}
