//! Account flows: login, registration, verification, password reset
//!
//! These calls are not optimistic. A 409 carries the account's
//! `registration_status` and turns into a redirect instead of an error.

use tracing::{info, warn};

use crate::cache::QueryData;
use crate::client::SocialClient;
use crate::error::{ClientError, ClientResult};
use crate::keys::QueryKey;
use crate::models::{
    AuthPayload, LoginRequest, ProfileUpdate, RegisterRequest, ResetPasswordRequest, User,
};
use crate::session::Session;
use crate::transport::{ApiResponse, Operation};

/// Screens of the account flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStep {
    VerifyEmail,
    CompleteProfile,
    Home,
    ValidateResetCode,
    ChangePassword,
    Login,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowOutcome {
    /// The call succeeded; continue to the step
    Proceed(RegistrationStep),
    /// The server reported the account is elsewhere in the flow
    Redirect(RegistrationStep),
}

impl FlowOutcome {
    pub fn step(&self) -> RegistrationStep {
        match self {
            FlowOutcome::Proceed(step) | FlowOutcome::Redirect(step) => *step,
        }
    }
}

/// Where a 409 sends the user: verified accounts still need a profile
pub fn redirect_for(registration_status: Option<&str>) -> RegistrationStep {
    match registration_status {
        Some("verified") => RegistrationStep::CompleteProfile,
        _ => RegistrationStep::Home,
    }
}

fn passwords_match(password: &str, confirmation: &str) -> ClientResult<()> {
    if password != confirmation {
        return Err(ClientError::invalid_field(
            "password_confirmation",
            "Passwords do not match",
        ));
    }
    Ok(())
}

impl SocialClient {
    /// Turn a 409 into a redirect; every other failure is reported as is
    fn conflict_redirect(&self, err: ClientError) -> ClientResult<FlowOutcome> {
        match &err {
            ClientError::Conflict {
                registration_status,
                message,
            } => {
                let step = redirect_for(registration_status.as_deref());
                info!(?registration_status, ?step, "Registration conflict, redirecting");
                self.notifier.info(message.clone());
                Ok(FlowOutcome::Redirect(step))
            }
            _ => {
                self.notifier.error(err.user_message());
                Err(err)
            }
        }
    }

    /// Run a flow request; `Err(outcome)` carries a redirect
    async fn flow_request(
        &self,
        operation: Operation,
    ) -> ClientResult<Result<ApiResponse, FlowOutcome>> {
        match self.send(operation).await {
            Ok(response) => Ok(Ok(response)),
            Err(err) => self.conflict_redirect(err).map(Err),
        }
    }

    fn start_session(&self, auth: AuthPayload) -> ClientResult<()> {
        let user = auth.user;
        self.store.clear();
        self.session.begin(Session {
            token: auth.token,
            user_id: user.id,
            user: Some(user.clone()),
        })?;
        self.store.set(QueryKey::CurrentUser, QueryData::CurrentUser(user));
        Ok(())
    }

    /// Refresh the current user from a flow response that embeds one
    fn absorb_user(&self, response: &ApiResponse) -> ClientResult<()> {
        match response.body.get("user") {
            Some(value) if !value.is_null() => {
                let user: User = serde_json::from_value(value.clone())?;
                self.session.set_user(user.clone())?;
                self.store.set(QueryKey::CurrentUser, QueryData::CurrentUser(user));
            }
            _ => {
                self.store.invalidate(&QueryKey::CurrentUser);
            }
        }
        Ok(())
    }

    pub async fn login(&self, email: &str, password: &str) -> ClientResult<FlowOutcome> {
        let operation = Operation::Login(LoginRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
        });
        let response = match self.flow_request(operation).await? {
            Ok(response) => response,
            Err(redirect) => return Ok(redirect),
        };

        let auth: AuthPayload = response.decode()?;
        self.start_session(auth)?;
        self.notifier
            .success(response.message().unwrap_or_else(|| "Welcome back".to_string()));
        Ok(FlowOutcome::Proceed(RegistrationStep::Home))
    }

    pub async fn register(&self, request: RegisterRequest) -> ClientResult<FlowOutcome> {
        passwords_match(&request.password, &request.password_confirmation)
            .map_err(|e| self.reject(e))?;
        let response = match self.flow_request(Operation::Register(request)).await? {
            Ok(response) => response,
            Err(redirect) => return Ok(redirect),
        };

        let auth: AuthPayload = response.decode()?;
        self.start_session(auth)?;
        self.notifier.success(
            response
                .message()
                .unwrap_or_else(|| "Check your inbox for a verification code".to_string()),
        );
        Ok(FlowOutcome::Proceed(RegistrationStep::VerifyEmail))
    }

    pub async fn verify_email(&self, code: &str) -> ClientResult<FlowOutcome> {
        self.viewer_id().map_err(|e| self.reject(e))?;
        let operation = Operation::VerifyEmail {
            code: code.trim().to_string(),
        };
        let response = match self.flow_request(operation).await? {
            Ok(response) => response,
            Err(redirect) => return Ok(redirect),
        };

        self.absorb_user(&response)?;
        self.notifier.success(
            response
                .message()
                .unwrap_or_else(|| "Email verified".to_string()),
        );
        Ok(FlowOutcome::Proceed(RegistrationStep::CompleteProfile))
    }

    pub async fn resend_verification_code(&self) -> ClientResult<FlowOutcome> {
        self.viewer_id().map_err(|e| self.reject(e))?;
        let response = match self.flow_request(Operation::ResendVerificationCode).await? {
            Ok(response) => response,
            Err(redirect) => return Ok(redirect),
        };
        self.notifier.info(
            response
                .message()
                .unwrap_or_else(|| "Verification code sent".to_string()),
        );
        Ok(FlowOutcome::Proceed(RegistrationStep::VerifyEmail))
    }

    pub async fn complete_profile(&self, profile: ProfileUpdate) -> ClientResult<FlowOutcome> {
        self.viewer_id().map_err(|e| self.reject(e))?;
        if profile.name.as_deref().map_or(false, |n| n.trim().is_empty()) {
            return Err(self.reject(ClientError::invalid_field("name", "Name is required")));
        }
        let response = match self.flow_request(Operation::CompleteProfile(profile)).await? {
            Ok(response) => response,
            Err(redirect) => return Ok(redirect),
        };

        self.absorb_user(&response)?;
        self.notifier.success(
            response
                .message()
                .unwrap_or_else(|| "Profile completed".to_string()),
        );
        Ok(FlowOutcome::Proceed(RegistrationStep::Home))
    }

    pub async fn send_reset_password_code(&self, email: &str) -> ClientResult<FlowOutcome> {
        let operation = Operation::SendResetPasswordCode {
            email: email.trim().to_string(),
        };
        let response = match self.flow_request(operation).await? {
            Ok(response) => response,
            Err(redirect) => return Ok(redirect),
        };
        self.notifier.info(
            response
                .message()
                .unwrap_or_else(|| "Reset code sent".to_string()),
        );
        Ok(FlowOutcome::Proceed(RegistrationStep::ValidateResetCode))
    }

    pub async fn validate_reset_code(&self, email: &str, code: &str) -> ClientResult<FlowOutcome> {
        let operation = Operation::ValidateResetCode {
            email: email.trim().to_string(),
            code: code.trim().to_string(),
        };
        match self.flow_request(operation).await? {
            Ok(_) => Ok(FlowOutcome::Proceed(RegistrationStep::ChangePassword)),
            Err(redirect) => Ok(redirect),
        }
    }

    pub async fn reset_password(&self, request: ResetPasswordRequest) -> ClientResult<FlowOutcome> {
        passwords_match(&request.password, &request.password_confirmation)
            .map_err(|e| self.reject(e))?;
        let response = match self.flow_request(Operation::ResetPassword(request)).await? {
            Ok(response) => response,
            Err(redirect) => return Ok(redirect),
        };
        self.notifier.success(
            response
                .message()
                .unwrap_or_else(|| "Password changed".to_string()),
        );
        Ok(FlowOutcome::Proceed(RegistrationStep::Login))
    }

    /// End the session. The current user leaves the cache either way; the
    /// rest of the store and the credentials go once the server agrees, or
    /// when it no longer recognises the token.
    pub async fn logout(&self) -> ClientResult<()> {
        let result = self.send(Operation::Logout).await;
        self.store.remove(&QueryKey::CurrentUser);

        match result {
            Ok(response) => {
                self.session.teardown()?;
                self.store.clear();
                self.notifier
                    .success(response.message().unwrap_or_else(|| "Logged out".to_string()));
                Ok(())
            }
            Err(ClientError::Unauthorized(message)) => {
                warn!(%message, "Token already rejected, clearing session");
                self.session.teardown()?;
                self.store.clear();
                Ok(())
            }
            Err(err) => {
                self.notifier.error(err.user_message());
                Err(err)
            }
        }
    }
}
