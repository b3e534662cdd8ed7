use aws_config::meta::region::RegionProviderChain;
use aws_config::retry::RetryConfig;
use aws_config::stalled_stream_protection::StalledStreamProtectionConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, ConfigLoader, SdkConfig};
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Builder, Credentials, Region};
use std::time::Duration;

use crate::config::ClientConfig;
use crate::types::S3Credentials;

impl ClientConfig {
    /// Build an S3 client from this configuration.
    ///
    /// Credentials come from static keys, a named profile or the default
    /// provider chain. An explicit region wins over the profile/environment
    /// region.
    pub async fn create_client(&self) -> Client {
        let mut config_builder = Builder::from(&self.load_sdk_config().await)
            .force_path_style(self.force_path_style)
            .request_checksum_calculation(self.request_checksum_calculation);

        if let Some(endpoint_url) = &self.endpoint_url {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }

        Client::from_conf(config_builder.build())
    }

    async fn load_sdk_config(&self) -> SdkConfig {
        let stalled_stream_protection = if self.disable_stalled_stream_protection {
            StalledStreamProtectionConfig::disabled()
        } else {
            StalledStreamProtectionConfig::enabled().build()
        };

        let config_loader = aws_config::defaults(BehaviorVersion::latest())
            .stalled_stream_protection(stalled_stream_protection)
            .retry_config(self.build_retry_config())
            .timeout_config(self.build_timeout_config());

        self.load_config_credential(config_loader)
            .region(self.build_region_provider())
            .load()
            .await
    }

    fn load_config_credential(&self, config_loader: ConfigLoader) -> ConfigLoader {
        match &self.credential {
            S3Credentials::Credentials { access_keys } => {
                let credentials = Credentials::new(
                    access_keys.access_key.to_string(),
                    access_keys.secret_access_key.to_string(),
                    access_keys.session_token.clone(),
                    None,
                    "",
                );
                config_loader.credentials_provider(credentials)
            }
            S3Credentials::Profile(profile_name) => config_loader.profile_name(profile_name),
            S3Credentials::FromEnvironment => config_loader,
        }
    }

    fn build_region_provider(&self) -> RegionProviderChain {
        let explicit_region = self.region.clone().map(Region::new);

        if let S3Credentials::Profile(profile_name) = &self.credential {
            let profile_region = aws_config::profile::ProfileFileRegionProvider::builder()
                .profile_name(profile_name)
                .build();
            RegionProviderChain::first_try(explicit_region).or_else(profile_region)
        } else {
            RegionProviderChain::first_try(explicit_region).or_default_provider()
        }
    }

    fn build_retry_config(&self) -> RetryConfig {
        RetryConfig::standard()
            .with_max_attempts(self.retry_config.aws_max_attempts)
            .with_initial_backoff(Duration::from_millis(
                self.retry_config.initial_backoff_milliseconds,
            ))
    }

    fn build_timeout_config(&self) -> TimeoutConfig {
        let timeouts = &self.cli_timeout_config;

        let mut builder = TimeoutConfig::builder();
        builder
            .set_operation_timeout(timeouts.operation_timeout_milliseconds.map(Duration::from_millis))
            .set_operation_attempt_timeout(
                timeouts
                    .operation_attempt_timeout_milliseconds
                    .map(Duration::from_millis),
            )
            .set_connect_timeout(timeouts.connect_timeout_milliseconds.map(Duration::from_millis))
            .set_read_timeout(timeouts.read_timeout_milliseconds.map(Duration::from_millis));
        builder.build()
    }
}
