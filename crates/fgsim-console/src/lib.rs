//! Terminal console for an fgsim hub: push session, action runner and the
//! client-side state that reconciles the two.

pub mod actions;
pub mod app;
pub mod command;
pub mod logs;
pub mod notifier;
pub mod products;
pub mod session;
pub mod state;
pub mod table;
pub mod task;
pub mod theme;
pub mod transport;
pub mod ui;
pub mod validator;

use fgsim_core::FrequencyId;
use thiserror::Error;

/// A precondition failure caught before any call goes out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocalRejection {
    #[error("configuration is not valid; fix it before starting a task")]
    ConfigInvalid,
    #[error("a start request is already in flight")]
    StartInFlight,
    #[error("viewer '{0}' has not been validated as an executable")]
    ViewerNotValidated(String),
    #[error("no viewer configured")]
    NoViewer,
    #[error("no product manifest loaded")]
    NoManifest,
    #[error("no product for '{component}' at frequency id {frequency}")]
    UnknownCell {
        component: String,
        frequency: FrequencyId,
    },
    #[error("{0} is empty")]
    EmptyArgument(&'static str),
}
