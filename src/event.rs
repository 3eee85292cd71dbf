//! Events delivered by the identity server.
//!
//! Kinds travel as the host's SCREAMING_SNAKE_CASE names and are parsed into
//! closed enums here, so an unknown name is a recoverable condition rather
//! than a deserialization failure.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EventError;

/// `details` key naming the identity provider of a login.
pub const IDENTITY_PROVIDER: &str = "identity_provider";

macro_rules! kinds {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident { $($variant:ident => $text:literal,)+ }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant,)+
        }

        impl $name {
            /// Every kind known to this build.
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            /// Name used by the host.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = EventError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(EventError::UnknownKind(s.to_owned())),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

kinds! {
    /// Kind of a user event.
    pub enum EventKind {
        Login => "LOGIN",
        LoginError => "LOGIN_ERROR",
        Register => "REGISTER",
        RegisterError => "REGISTER_ERROR",
        Logout => "LOGOUT",
        LogoutError => "LOGOUT_ERROR",
        CodeToToken => "CODE_TO_TOKEN",
        CodeToTokenError => "CODE_TO_TOKEN_ERROR",
        ClientLogin => "CLIENT_LOGIN",
        ClientLoginError => "CLIENT_LOGIN_ERROR",
        RefreshToken => "REFRESH_TOKEN",
        RefreshTokenError => "REFRESH_TOKEN_ERROR",
        ValidateAccessToken => "VALIDATE_ACCESS_TOKEN",
        ValidateAccessTokenError => "VALIDATE_ACCESS_TOKEN_ERROR",
        IntrospectToken => "INTROSPECT_TOKEN",
        IntrospectTokenError => "INTROSPECT_TOKEN_ERROR",
        FederatedIdentityLink => "FEDERATED_IDENTITY_LINK",
        FederatedIdentityLinkError => "FEDERATED_IDENTITY_LINK_ERROR",
        RemoveFederatedIdentity => "REMOVE_FEDERATED_IDENTITY",
        RemoveFederatedIdentityError => "REMOVE_FEDERATED_IDENTITY_ERROR",
        UpdateEmail => "UPDATE_EMAIL",
        UpdateEmailError => "UPDATE_EMAIL_ERROR",
        UpdateProfile => "UPDATE_PROFILE",
        UpdateProfileError => "UPDATE_PROFILE_ERROR",
        UpdatePassword => "UPDATE_PASSWORD",
        UpdatePasswordError => "UPDATE_PASSWORD_ERROR",
        UpdateTotp => "UPDATE_TOTP",
        UpdateTotpError => "UPDATE_TOTP_ERROR",
        VerifyEmail => "VERIFY_EMAIL",
        VerifyEmailError => "VERIFY_EMAIL_ERROR",
        VerifyProfile => "VERIFY_PROFILE",
        VerifyProfileError => "VERIFY_PROFILE_ERROR",
        RemoveTotp => "REMOVE_TOTP",
        RemoveTotpError => "REMOVE_TOTP_ERROR",
        GrantConsent => "GRANT_CONSENT",
        GrantConsentError => "GRANT_CONSENT_ERROR",
        UpdateConsent => "UPDATE_CONSENT",
        UpdateConsentError => "UPDATE_CONSENT_ERROR",
        RevokeGrant => "REVOKE_GRANT",
        RevokeGrantError => "REVOKE_GRANT_ERROR",
        SendVerifyEmail => "SEND_VERIFY_EMAIL",
        SendVerifyEmailError => "SEND_VERIFY_EMAIL_ERROR",
        SendResetPassword => "SEND_RESET_PASSWORD",
        SendResetPasswordError => "SEND_RESET_PASSWORD_ERROR",
        SendIdentityProviderLink => "SEND_IDENTITY_PROVIDER_LINK",
        SendIdentityProviderLinkError => "SEND_IDENTITY_PROVIDER_LINK_ERROR",
        ResetPassword => "RESET_PASSWORD",
        ResetPasswordError => "RESET_PASSWORD_ERROR",
        RestartAuthentication => "RESTART_AUTHENTICATION",
        RestartAuthenticationError => "RESTART_AUTHENTICATION_ERROR",
        InvalidSignature => "INVALID_SIGNATURE",
        InvalidSignatureError => "INVALID_SIGNATURE_ERROR",
        RegisterNode => "REGISTER_NODE",
        RegisterNodeError => "REGISTER_NODE_ERROR",
        UnregisterNode => "UNREGISTER_NODE",
        UnregisterNodeError => "UNREGISTER_NODE_ERROR",
        UserInfoRequest => "USER_INFO_REQUEST",
        UserInfoRequestError => "USER_INFO_REQUEST_ERROR",
        IdentityProviderLinkAccount => "IDENTITY_PROVIDER_LINK_ACCOUNT",
        IdentityProviderLinkAccountError => "IDENTITY_PROVIDER_LINK_ACCOUNT_ERROR",
        IdentityProviderLogin => "IDENTITY_PROVIDER_LOGIN",
        IdentityProviderLoginError => "IDENTITY_PROVIDER_LOGIN_ERROR",
        IdentityProviderFirstLogin => "IDENTITY_PROVIDER_FIRST_LOGIN",
        IdentityProviderFirstLoginError => "IDENTITY_PROVIDER_FIRST_LOGIN_ERROR",
        IdentityProviderPostLogin => "IDENTITY_PROVIDER_POST_LOGIN",
        IdentityProviderPostLoginError => "IDENTITY_PROVIDER_POST_LOGIN_ERROR",
        IdentityProviderResponse => "IDENTITY_PROVIDER_RESPONSE",
        IdentityProviderResponseError => "IDENTITY_PROVIDER_RESPONSE_ERROR",
        IdentityProviderRetrieveToken => "IDENTITY_PROVIDER_RETRIEVE_TOKEN",
        IdentityProviderRetrieveTokenError => "IDENTITY_PROVIDER_RETRIEVE_TOKEN_ERROR",
        Impersonate => "IMPERSONATE",
        ImpersonateError => "IMPERSONATE_ERROR",
        CustomRequiredAction => "CUSTOM_REQUIRED_ACTION",
        CustomRequiredActionError => "CUSTOM_REQUIRED_ACTION_ERROR",
        ExecuteActions => "EXECUTE_ACTIONS",
        ExecuteActionsError => "EXECUTE_ACTIONS_ERROR",
        ExecuteActionToken => "EXECUTE_ACTION_TOKEN",
        ExecuteActionTokenError => "EXECUTE_ACTION_TOKEN_ERROR",
        ClientInfo => "CLIENT_INFO",
        ClientInfoError => "CLIENT_INFO_ERROR",
        ClientRegister => "CLIENT_REGISTER",
        ClientRegisterError => "CLIENT_REGISTER_ERROR",
        ClientUpdate => "CLIENT_UPDATE",
        ClientUpdateError => "CLIENT_UPDATE_ERROR",
        ClientDelete => "CLIENT_DELETE",
        ClientDeleteError => "CLIENT_DELETE_ERROR",
        ClientInitiatedAccountLinking => "CLIENT_INITIATED_ACCOUNT_LINKING",
        ClientInitiatedAccountLinkingError => "CLIENT_INITIATED_ACCOUNT_LINKING_ERROR",
        TokenExchange => "TOKEN_EXCHANGE",
        TokenExchangeError => "TOKEN_EXCHANGE_ERROR",
        PermissionToken => "PERMISSION_TOKEN",
        PermissionTokenError => "PERMISSION_TOKEN_ERROR",
        DeleteAccount => "DELETE_ACCOUNT",
        DeleteAccountError => "DELETE_ACCOUNT_ERROR",
    }
}

kinds! {
    /// Kind of an administrative operation.
    pub enum OperationKind {
        Create => "CREATE",
        Update => "UPDATE",
        Delete => "DELETE",
        Action => "ACTION",
    }
}

/// Event raised by a user or client interaction.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserEvent {
    pub kind: Option<String>,
    pub realm_id: Option<String>,
    pub client_id: Option<String>,
    pub user_id: Option<String>,
    pub error: Option<String>,
    pub details: HashMap<String, String>,
}

impl UserEvent {
    /// Create an event of `kind` in `realm`.
    pub fn new(kind: EventKind, realm: &str) -> Self {
        Self {
            kind: Some(kind.as_str().to_owned()),
            realm_id: Some(realm.to_owned()),
            ..Default::default()
        }
    }

    pub fn client(mut self, client_id: &str) -> Self {
        self.client_id = Some(client_id.to_owned());
        self
    }

    pub fn error(mut self, error: &str) -> Self {
        self.error = Some(error.to_owned());
        self
    }

    pub fn detail(mut self, key: &str, value: &str) -> Self {
        self.details.insert(key.to_owned(), value.to_owned());
        self
    }

    /// Parsed kind of the event.
    pub fn event_kind(&self) -> Result<EventKind, EventError> {
        self.kind.as_deref().ok_or(EventError::MissingKind)?.parse()
    }

    /// Identity provider the user came through, if any.
    pub fn identity_provider(&self) -> Option<&str> {
        self.details.get(IDENTITY_PROVIDER).map(String::as_str)
    }
}

/// Event raised by an administrative change.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminEvent {
    pub operation_kind: Option<String>,
    pub resource_kind: Option<String>,
    pub realm_id: Option<String>,
}

impl AdminEvent {
    /// Create an admin event.
    pub fn new(operation: OperationKind, resource: &str, realm: &str) -> Self {
        Self {
            operation_kind: Some(operation.as_str().to_owned()),
            resource_kind: Some(resource.to_owned()),
            realm_id: Some(realm.to_owned()),
        }
    }

    /// Parsed operation of the event.
    pub fn operation(&self) -> Result<OperationKind, EventError> {
        self.operation_kind
            .as_deref()
            .ok_or(EventError::MissingKind)?
            .parse()
    }
}

/// Active client sessions of a realm.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionStats {
    pub realm: String,
    /// Online sessions per client ID.
    pub online: HashMap<String, u64>,
    /// Offline sessions per client ID.
    pub offline: HashMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), *kind);
        }
        for op in OperationKind::ALL {
            assert_eq!(op.to_string().parse::<OperationKind>().unwrap(), *op);
        }
    }

    #[test]
    fn test_unknown_and_missing_kind() {
        let event = UserEvent {
            kind: Some("SOMETHING_NEW".into()),
            ..Default::default()
        };
        assert_eq!(
            event.event_kind(),
            Err(EventError::UnknownKind("SOMETHING_NEW".into()))
        );
        assert_eq!(
            UserEvent::default().event_kind(),
            Err(EventError::MissingKind)
        );
    }

    #[test]
    fn test_deserialize_partial_event() {
        let event: UserEvent = serde_json::from_str(
            r#"{"kind":"LOGIN","realm_id":"master","details":{"identity_provider":"github"}}"#,
        )
        .unwrap();

        assert_eq!(event.event_kind(), Ok(EventKind::Login));
        assert_eq!(event.identity_provider(), Some("github"));
        assert_eq!(event.client_id, None);
    }
}
