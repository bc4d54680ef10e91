use std::sync::OnceLock;

use dialoguer::{Confirm, Input, Password};
use regex::Regex;

use crate::credentials::Credentials;
use crate::error::LifecycleError;

/// Interactive inputs collected once the service is reachable.
///
/// Implementations may block; the controller runs them off the async runtime.
pub trait Operator: Send + Sync {
    fn email(&self) -> Result<String, LifecycleError>;
    fn wants_credentialed_scan(&self) -> Result<bool, LifecycleError>;
    fn credentials(&self) -> Result<Credentials, LifecycleError>;
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("email pattern is valid")
    })
}

/// Accepts the trimmed input when it looks like a deliverable address.
pub fn is_valid_email(input: &str) -> bool {
    email_regex().is_match(input.trim())
}

fn prompt_err(e: dialoguer::Error) -> LifecycleError {
    LifecycleError::Prompt(e.to_string())
}

/// Terminal prompts via `dialoguer`.
#[derive(Debug, Clone, Default)]
pub struct TerminalOperator;

impl Operator for TerminalOperator {
    fn email(&self) -> Result<String, LifecycleError> {
        let email: String = Input::new()
            .with_prompt("Please enter your email address to receive the scan results")
            .validate_with(|input: &String| -> Result<(), &str> {
                if is_valid_email(input) {
                    Ok(())
                } else {
                    Err("Invalid email address. Please enter a valid email address.")
                }
            })
            .interact_text()
            .map_err(prompt_err)?;
        Ok(email.trim().to_string())
    }

    fn wants_credentialed_scan(&self) -> Result<bool, LifecycleError> {
        Confirm::new()
            .with_prompt("Do you want to run a credentialed/full scan?")
            .default(true)
            .interact()
            .map_err(prompt_err)
    }

    fn credentials(&self) -> Result<Credentials, LifecycleError> {
        let username: String = Input::new()
            .with_prompt("Enter your username with administrative privileges")
            .interact_text()
            .map_err(prompt_err)?;
        let password = Password::new()
            .with_prompt("Enter the password for the account")
            .allow_empty_password(true)
            .interact()
            .map_err(prompt_err)?;
        Ok(Credentials {
            username: username.trim().to_string(),
            password,
        })
    }
}
