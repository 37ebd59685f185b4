use anyhow::{Context, Result};
use async_trait::async_trait;
use google_gmail1::oauth2;
use hyper::client::HttpConnector;
use hyper_rustls::HttpsConnector;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use tracing::{info, warn};
use yup_oauth2::authenticator_delegate::InstalledFlowDelegate;
use yup_oauth2::storage::{TokenInfo, TokenStorage};
use yup_oauth2::{
    ApplicationSecret, InstalledFlowAuthenticator, InstalledFlowReturnMethod,
    read_application_secret,
};

const APP_NAME: &str = "gtriage";
const TOKEN_KEY: &str = "gmail_token";

/// Reading messages and adding/removing labels.
pub const SCOPES: &[&str] = &["https://www.googleapis.com/auth/gmail.modify"];

pub type GmailAuthenticator = oauth2::authenticator::Authenticator<HttpsConnector<HttpConnector>>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenData {
    tokens: Vec<TokenInfo>,
}

/// OAuth tokens kept in the OS keyring instead of a token file.
pub struct RingStorage;

#[async_trait]
impl TokenStorage for RingStorage {
    async fn set(&self, _scopes: &[&str], token: TokenInfo) -> Result<()> {
        let entry = Entry::new(APP_NAME, TOKEN_KEY)
            .map_err(|e| anyhow::anyhow!("Keyring error: {}", e))?;

        let data = TokenData {
            tokens: vec![token],
        };
        let serialized = serde_json::to_string(&data).context("Failed to serialize tokens")?;

        entry
            .set_password(&serialized)
            .map_err(|e| anyhow::anyhow!("Keyring error: {}", e))?;

        Ok(())
    }

    async fn get(&self, _scopes: &[&str]) -> Option<TokenInfo> {
        self.get_all()
            .await
            .ok()
            .and_then(|data| data.tokens.into_iter().next())
    }
}

impl RingStorage {
    async fn get_all(&self) -> Result<TokenData> {
        let entry = Entry::new(APP_NAME, TOKEN_KEY)
            .map_err(|e| anyhow::anyhow!("Keyring error: {}", e))?;

        match entry.get_password() {
            Ok(serialized) => {
                serde_json::from_str(&serialized).context("Failed to deserialize tokens")
            }
            Err(keyring::Error::NoEntry) => Ok(TokenData::default()),
            Err(e) => Err(anyhow::anyhow!("Keyring error: {}", e)),
        }
    }

    pub async fn clear_token(&self) -> Result<()> {
        let entry = Entry::new(APP_NAME, TOKEN_KEY)
            .map_err(|e| anyhow::anyhow!("Keyring error: {}", e))?;

        match entry.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(anyhow::anyhow!("Keyring error: {}", e)),
        }
    }
}

/// Opens the consent page in the default browser, printing the URL as well
/// in case no browser is available.
pub struct BrowserDelegate;

impl InstalledFlowDelegate for BrowserDelegate {
    fn present_user_url<'a>(
        &'a self,
        url: &'a str,
        _need_code: bool,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<String, String>> + Send + 'a>> {
        Box::pin(async move {
            println!("Authorize gtriage to access Gmail:\n{}", url);
            if let Err(e) = open::that(url) {
                warn!(error = %e, "Could not open a browser");
            }
            Ok(String::new())
        })
    }
}

pub struct Authenticator;

impl Authenticator {
    pub async fn load_secret<P: AsRef<Path>>(path: P) -> Result<ApplicationSecret> {
        read_application_secret(path)
            .await
            .context("Failed to read application secret")
    }

    pub async fn authenticate(secret: ApplicationSecret) -> Result<GmailAuthenticator> {
        let auth =
            InstalledFlowAuthenticator::builder(secret, InstalledFlowReturnMethod::HTTPRedirect)
                .with_storage(Box::new(RingStorage))
                .flow_delegate(Box::new(BrowserDelegate))
                .build()
                .await
                .context("Failed to build authenticator")?;

        auth.token(SCOPES)
            .await
            .context("Failed to obtain Gmail access token")?;
        info!("Gmail authentication ready");
        Ok(auth)
    }
}
