use crate::cmd;
use crate::dns::{self, DnsProvider};
use crate::error::{DeployError, DeployResult};

const CF_API: &str = "https://api.cloudflare.com/client/v4";

/// Cloudflare DNS provider using the Cloudflare API via curl.
///
/// Requires `CF_API_TOKEN` environment variable set with a token
/// that has `Zone > DNS > Edit` permissions.
pub struct Cloudflare {
    domain: String,
}

impl Cloudflare {
    #[must_use]
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
        }
    }

    fn token() -> DeployResult<String> {
        std::env::var("CF_API_TOKEN").map_err(|_| {
            DeployError::EnvMissing(
                "CF_API_TOKEN not set. Create a token at: \
                 https://dash.cloudflare.com/profile/api-tokens"
                    .into(),
            )
        })
    }

    fn api_get(token: &str, path: &str) -> DeployResult<String> {
        let url = format!("{CF_API}{path}");
        cmd::run(
            "curl",
            &[
                "-s",
                "-X",
                "GET",
                "-H",
                &format!("Authorization: Bearer {token}"),
                "-H",
                "Content-Type: application/json",
                &url,
            ],
        )
    }

    fn api_request(
        token: &str,
        method: &str,
        path: &str,
        body: Option<&str>,
    ) -> DeployResult<String> {
        let url = format!("{CF_API}{path}");
        let mut args = vec![
            "-s".to_string(),
            "-X".to_string(),
            method.to_string(),
            "-H".to_string(),
            format!("Authorization: Bearer {token}"),
            "-H".to_string(),
            "Content-Type: application/json".to_string(),
        ];
        if let Some(b) = body {
            args.push("-d".to_string());
            args.push(b.to_string());
        }
        args.push(url);

        let args_ref: Vec<&str> = args.iter().map(String::as_str).collect();
        cmd::run("curl", &args_ref)
    }

    fn get_zone_id(token: &str, zone: &str) -> DeployResult<String> {
        let path = format!("/zones?name={zone}");
        let response = Self::api_get(token, &path)?;
        let parsed: serde_json::Value = serde_json::from_str(&response)?;

        parsed["result"]
            .as_array()
            .and_then(|arr| arr.first())
            .and_then(|z| z["id"].as_str())
            .map(String::from)
            .ok_or_else(|| DeployError::DnsError(format!("zone '{zone}' not found")))
    }

    fn find_existing_record(
        token: &str,
        zone_id: &str,
        record_type: &str,
        domain: &str,
    ) -> DeployResult<Option<String>> {
        let path = format!("/zones/{zone_id}/dns_records?type={record_type}&name={domain}");
        let response = Self::api_get(token, &path)?;
        let parsed: serde_json::Value = serde_json::from_str(&response)?;

        Ok(parsed["result"]
            .as_array()
            .and_then(|arr| arr.first())
            .and_then(|r| r["id"].as_str())
            .map(String::from))
    }

    fn upsert_record(&self, record_type: &str, name: &str, content: &str) -> DeployResult<String> {
        let token = Self::token()?;
        let (zone, _) = dns::split_domain(&self.domain);
        let zone_id = Self::get_zone_id(&token, &zone)?;
        let existing = Self::find_existing_record(&token, &zone_id, record_type, name)?;

        let body = format!(
            r#"{{"type":"{record_type}","name":"{name}","content":{},"ttl":300,"proxied":false}}"#,
            serde_json::Value::String(content.to_string())
        );

        let record_id = if let Some(record_id) = existing {
            let path = format!("/zones/{zone_id}/dns_records/{record_id}");
            Self::api_request(&token, "PUT", &path, Some(&body))?;
            record_id
        } else {
            let path = format!("/zones/{zone_id}/dns_records");
            let response = Self::api_request(&token, "POST", &path, Some(&body))?;
            let parsed: serde_json::Value = serde_json::from_str(&response)?;
            parsed["result"]["id"]
                .as_str()
                .ok_or_else(|| DeployError::DnsError("record created without id".into()))?
                .to_string()
        };

        Ok(record_id)
    }

    fn delete_record(&self, record_type: &str, name: &str) -> DeployResult<()> {
        let token = Self::token()?;
        let (zone, _) = dns::split_domain(&self.domain);
        let zone_id = Self::get_zone_id(&token, &zone)?;

        if let Some(record_id) = Self::find_existing_record(&token, &zone_id, record_type, name)? {
            let path = format!("/zones/{zone_id}/dns_records/{record_id}");
            Self::api_request(&token, "DELETE", &path, None)?;
        }
        Ok(())
    }
}

impl DnsProvider for Cloudflare {
    fn domain(&self) -> &str {
        &self.domain
    }

    fn upsert_a_record(&self, ip: &str) -> DeployResult<String> {
        let domain = self.domain.clone();
        let id = self.upsert_record("A", &domain, ip)?;
        tracing::info!(target: crate::logging::DEPLOYMENT, domain = %self.domain, ip, "Cloudflare A record set");
        Ok(id)
    }

    fn delete_a_record(&self) -> DeployResult<()> {
        let domain = self.domain.clone();
        self.delete_record("A", &domain)?;
        tracing::info!(target: crate::logging::DEPLOYMENT, domain = %self.domain, "Cloudflare A record deleted");
        Ok(())
    }

    fn upsert_txt_record(&self, value: &str) -> DeployResult<String> {
        let name = format!("_acme-challenge.{}", self.domain);
        tracing::info!(target: crate::logging::DEPLOYMENT, record = %name, "Cloudflare TXT record set");
        self.upsert_record("TXT", &name, value)
    }

    fn delete_txt_record(&self) -> DeployResult<()> {
        let name = format!("_acme-challenge.{}", self.domain);
        self.delete_record("TXT", &name)
    }
}
