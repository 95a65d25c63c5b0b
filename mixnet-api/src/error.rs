use mixnet_core::MixnetError;
use tonic::{Code, Status};

/// Maps the core error taxonomy onto gRPC status codes.
pub fn to_status(err: MixnetError) -> Status {
    match err {
        MixnetError::Crypto(msg) => Status::new(Code::InvalidArgument, msg),
        MixnetError::StaleRound { round } => {
            Status::new(Code::FailedPrecondition, format!("round {round} already released"))
        }
        MixnetError::RegistrationFull => {
            Status::new(Code::FailedPrecondition, "registration quorum already met")
        }
        MixnetError::Config(e) => Status::new(Code::Internal, e.to_string()),
        MixnetError::Transport(msg) => Status::new(Code::Unavailable, msg),
        MixnetError::ShutdownInProgress => Status::new(Code::Unavailable, "shutdown in progress"),
        MixnetError::Io(e) => Status::new(Code::Internal, e.to_string()),
    }
}
