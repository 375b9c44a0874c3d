//! Interactive configuration: turn a username and password into a
//! persisted [`EntryData`].

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::api::{Authenticator, ThermostatApi};
use crate::client::LuxClient;
use crate::protocol::device_for_entry;
use crate::types::*;
use crate::{Error, Result};

pub const STEP_USER: &str = "user";
pub const USER_FIELDS: &[&str] = &["username", "password"];

/// Builds an API handle for freshly issued tokens.
pub type Connect = dyn Fn(&Credentials, &TokenBundle) -> Result<Arc<dyn ThermostatApi>> + Send + Sync;

/// Log in, fetch the account and pick the device to configure.
pub async fn validate_input(
    authenticator: &dyn Authenticator,
    connect: &Connect,
    credentials: &Credentials,
) -> Result<EntryData> {
    let tokens = authenticator
        .login(credentials)
        .await
        .map_err(|e| match e {
            Error::InvalidAuth(msg) => Error::InvalidAuth(msg),
            Error::Unauthorized => Error::InvalidAuth("credentials rejected".into()),
            Error::Http(_) | Error::Io(_) | Error::Timeout => Error::CannotConnect(e.to_string()),
            other => other,
        })?;
    if tokens.is_empty() {
        return Err(Error::InvalidAuth("login returned no tokens".into()));
    }

    let api = connect(credentials, &tokens)?;
    let account = api.get_user().await.map_err(|e| {
        error!(error = %e, "error getting user");
        Error::CannotConnect(format!("error getting user: {e}"))
    })?;

    let (device_id, name) = device_for_entry(&account);
    info!(user = %credentials.username, device = %device_id, %name, "validated account");

    Ok(EntryData {
        username: credentials.username.clone(),
        password: credentials.password.clone(),
        device_id,
        name,
        tokens,
    })
}

/// Form error key for a failed validation.
pub fn error_key(e: &Error) -> &'static str {
    match e {
        Error::InvalidAuth(_) => "invalid_auth",
        Error::CannotConnect(_) => "cannot_connect",
        _ => "unknown",
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowResult {
    ShowForm {
        step_id: &'static str,
        fields: &'static [&'static str],
        errors: BTreeMap<String, String>,
    },
    CreateEntry {
        title: String,
        data: EntryData,
    },
}

pub struct ConfigFlow {
    authenticator: Arc<dyn Authenticator>,
    connect: Box<Connect>,
}

impl ConfigFlow {
    pub const VERSION: u32 = 1;

    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        connect: impl Fn(&Credentials, &TokenBundle) -> Result<Arc<dyn ThermostatApi>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            authenticator,
            connect: Box::new(connect),
        }
    }

    /// Flow that talks to the vendor cloud through [`LuxClient`].
    pub fn with_lux_client(authenticator: Arc<dyn Authenticator>) -> Self {
        Self::new(authenticator, |credentials, tokens| {
            let client = LuxClient::builder()
                .credentials(credentials.clone())
                .tokens(tokens.clone())
                .build()?;
            Ok(Arc::new(client) as Arc<dyn ThermostatApi>)
        })
    }

    pub async fn step_user(&self, input: Option<Credentials>) -> FlowResult {
        let mut errors = BTreeMap::new();

        if let Some(credentials) = input {
            match validate_input(self.authenticator.as_ref(), self.connect.as_ref(), &credentials).await {
                Ok(data) => {
                    return FlowResult::CreateEntry {
                        title: data.name.clone(),
                        data,
                    };
                }
                Err(e) => {
                    let key = error_key(&e);
                    if key == "unknown" {
                        warn!(error = %e, "unexpected error validating input");
                    }
                    errors.insert("base".to_string(), key.to_string());
                }
            }
        }

        FlowResult::ShowForm {
            step_id: STEP_USER,
            fields: USER_FIELDS,
            errors,
        }
    }
}
