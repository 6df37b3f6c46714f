//! Identity commands.

use cartsync_core::Identity;
use secrecy::SecretString;

use super::{CommandError, Context};

/// Store a bearer token.
pub fn login(ctx: &Context, token: String) -> Result<(), CommandError> {
    ctx.identity().set_bearer_token(&SecretString::from(token))?;
    tracing::info!("Signed in; requests now carry the bearer token");
    Ok(())
}

/// Forget the bearer token and the anonymous session key.
pub fn logout(ctx: &Context) -> Result<(), CommandError> {
    ctx.identity().sign_out()?;
    tracing::info!("Signed out");
    Ok(())
}

/// Report which identity requests are sent with.
pub fn whoami(ctx: &Context) {
    tracing::info!("{}", describe(&ctx.identity().identity()));
}

/// Credential values stay out of logs; only the kind is reported.
const fn describe(identity: &Identity) -> &'static str {
    match identity {
        Identity::Authenticated(_) => "Signed in (bearer token)",
        Identity::Anonymous(_) => "Anonymous session",
        Identity::None => "No identity yet; the next cart request creates one",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_never_contains_credentials() {
        let anonymous = Identity::Anonymous("tok-7f3a9c".to_string());
        assert_eq!(describe(&anonymous), "Anonymous session");
        assert!(!describe(&anonymous).contains("tok-7f3a9c"));

        let signed_in = Identity::Authenticated(SecretString::from("jwt-abc"));
        assert!(!describe(&signed_in).contains("jwt-abc"));
    }
}
