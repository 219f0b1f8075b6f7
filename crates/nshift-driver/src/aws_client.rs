use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use quick_xml::{events::Event as XmlEvent, Reader as XmlReader};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::DriverError;

type HmacSha256 = Hmac<Sha256>;

/// Ambient or assumed-role AWS credentials used to sign a request.
#[derive(Clone, Debug)]
pub struct SigningCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect()
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn derive_signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn url_host(url: &str) -> &str {
    let without_scheme = url.trim_start_matches("https://").trim_start_matches("http://");
    match without_scheme.find('/') {
        Some(pos) => &without_scheme[..pos],
        None => without_scheme,
    }
}

fn sigv4_headers(
    method: &str,
    uri_path: &str,
    query_string: &str,
    content_type: &str,
    body: &[u8],
    creds: &SigningCredentials,
    region: &str,
    service: &str,
    host: &str,
    extra_headers: &[(&str, &str)],
) -> BTreeMap<String, String> {
    let now = chrono::Utc::now();
    let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();

    let payload_hash = sha256_hex(body);

    let mut canon_hdrs: BTreeMap<String, String> = BTreeMap::new();
    canon_hdrs.insert("content-type".into(), content_type.into());
    canon_hdrs.insert("host".into(), host.into());
    canon_hdrs.insert("x-amz-content-sha256".into(), payload_hash.clone());
    canon_hdrs.insert("x-amz-date".into(), timestamp.clone());
    for (k, v) in extra_headers {
        canon_hdrs.insert(k.to_ascii_lowercase(), v.to_string());
    }
    if let Some(ref token) = creds.session_token {
        canon_hdrs.insert("x-amz-security-token".into(), token.clone());
    }

    let signed_headers: String = canon_hdrs.keys().cloned().collect::<Vec<_>>().join(";");
    let canonical_headers: String =
        canon_hdrs.iter().map(|(k, v)| format!("{}:{}\n", k, v.trim())).collect();

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method, uri_path, query_string, canonical_headers, signed_headers, payload_hash
    );

    let scope = format!("{}/{}/{}/aws4_request", date, region, service);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        timestamp,
        scope,
        sha256_hex(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, &date, region, service);
    let signature = hmac_sha256(&signing_key, string_to_sign.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>();

    let auth = format!(
        "AWS4-HMAC-SHA256 Credential={}/{},SignedHeaders={},Signature={}",
        creds.access_key_id, scope, signed_headers, signature
    );

    let mut out = BTreeMap::new();
    out.insert("Authorization".into(), auth);
    out.insert("x-amz-date".into(), timestamp);
    out.insert("x-amz-content-sha256".into(), payload_hash);
    for (k, v) in extra_headers {
        out.insert((*k).to_string(), (*v).to_string());
    }
    if let Some(ref token) = creds.session_token {
        out.insert("x-amz-security-token".into(), token.clone());
    }
    out
}

/// Text content of the first `<tag>…</tag>` element, ignoring nested elements.
pub(crate) fn xml_text(xml: &str, tag: &str) -> Option<String> {
    let tag_bytes = tag.as_bytes();
    let mut reader = XmlReader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut in_tag = false;
    let mut depth: usize = 0;

    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) => {
                if !in_tag && e.local_name().as_ref() == tag_bytes {
                    in_tag = true;
                    depth = 0;
                } else if in_tag {
                    depth += 1;
                }
            }
            Ok(XmlEvent::End(_)) => {
                if in_tag {
                    if depth == 0 {
                        return None;
                    }
                    depth -= 1;
                }
            }
            Ok(XmlEvent::Text(e)) if in_tag && depth == 0 => {
                return e.unescape().ok().map(|s| s.into_owned());
            }
            Ok(XmlEvent::Eof) | Err(_) => break,
            _ => {}
        }
    }
    None
}

pub(crate) fn xml_all_texts(xml: &str, tag: &str) -> Vec<String> {
    let tag_bytes = tag.as_bytes();
    let mut reader = XmlReader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut result = Vec::new();
    let mut depth: usize = 0;

    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) => {
                if depth == 0 && e.local_name().as_ref() == tag_bytes {
                    depth = 1;
                } else if depth > 0 {
                    depth += 1;
                }
            }
            Ok(XmlEvent::End(_)) => {
                if depth > 0 {
                    depth -= 1;
                }
            }
            Ok(XmlEvent::Text(e)) if depth == 1 => {
                if let Ok(s) = e.unescape() {
                    result.push(s.into_owned());
                }
            }
            Ok(XmlEvent::Eof) | Err(_) => break,
            _ => {}
        }
    }
    result
}

fn xml_error_code(xml: &str) -> String {
    xml_text(xml, "Code").unwrap_or_else(|| "Unknown".into())
}

fn xml_error_message(xml: &str) -> String {
    xml_text(xml, "Message").unwrap_or_else(|| "unknown error".into())
}

/// Thin HTTP+SigV4 client shared by every resource driver and the
/// Credential Broker. Holds no credentials of its own — every call takes
/// them as a parameter.
#[derive(Clone)]
pub struct AwsApiClient {
    http: reqwest::Client,
}

impl Default for AwsApiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl AwsApiClient {
    pub fn new() -> Self {
        Self { http: reqwest::Client::new() }
    }

    /// POST an AWS Query-protocol request (EC2, RDS, Auto Scaling, IAM,
    /// STS), returning the raw XML response body.
    pub async fn query_api(
        &self,
        base_url: &str,
        region: &str,
        service: &str,
        creds: &SigningCredentials,
        params: &[(&str, &str)],
    ) -> Result<String, DriverError> {
        let host = url_host(base_url).to_string();
        let url = format!("{}/", base_url.trim_end_matches('/'));

        let body_str = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let body_bytes = body_str.as_bytes();

        let ct = "application/x-www-form-urlencoded; charset=utf-8";
        let sig_headers = sigv4_headers("POST", "/", "", ct, body_bytes, creds, region, service, &host, &[]);

        let mut req = self.http.post(&url).header("Content-Type", ct).body(body_bytes.to_vec());
        for (k, v) in &sig_headers {
            req = req.header(k, v);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| DriverError::Internal(format!("POST {} failed: {}", url, e)))?;

        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();

        if status >= 400 {
            return Err(DriverError::ResourceDescribeFailed(format!(
                "{}: {} — {}",
                base_url,
                xml_error_code(&text),
                xml_error_message(&text)
            )));
        }
        Ok(text)
    }

    /// POST an AWS JSON-protocol (X-Amz-Target) request (ECS, STS-assume-role
    /// alt path), returning the parsed JSON response.
    pub async fn json_api(
        &self,
        base_url: &str,
        region: &str,
        service: &str,
        target: &str,
        creds: &SigningCredentials,
        body: &Value,
    ) -> Result<Value, DriverError> {
        let host = url_host(base_url).to_string();
        let url = format!("{}/", base_url.trim_end_matches('/'));
        let body_str = serde_json::to_string(body).unwrap_or_default();
        let body_bytes = body_str.as_bytes();
        let ct = "application/x-amz-json-1.1";

        let sig_headers = sigv4_headers(
            "POST",
            "/",
            "",
            ct,
            body_bytes,
            creds,
            region,
            service,
            &host,
            &[("X-Amz-Target", target)],
        );

        let mut req = self
            .http
            .post(&url)
            .header("Content-Type", ct)
            .header("X-Amz-Target", target)
            .body(body_bytes.to_vec());
        for (k, v) in &sig_headers {
            req = req.header(k, v);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| DriverError::Internal(format!("POST {} failed: {}", url, e)))?;

        let status = resp.status().as_u16();
        let resp_body: Value = resp.json().await.unwrap_or(Value::Null);

        if status >= 400 {
            let error_type = resp_body["__type"].as_str().unwrap_or("Unknown");
            let msg = resp_body["message"]
                .as_str()
                .or_else(|| resp_body["Message"].as_str())
                .unwrap_or("unknown error");
            return Err(DriverError::ResourceDescribeFailed(format!(
                "{} [{}]: {} — {}",
                base_url, target, error_type, msg
            )));
        }
        Ok(resp_body)
    }

    /// STS AssumeRole: mint temporary credentials scoped to `role_arn`.
    pub async fn sts_assume_role(
        &self,
        endpoints: &Endpoints,
        creds: &SigningCredentials,
        role_arn: &str,
        session_name: &str,
        external_id: Option<&str>,
        duration_secs: u32,
    ) -> Result<SigningCredentials, DriverError> {
        let duration = duration_secs.to_string();
        let mut params = vec![
            ("Action", "AssumeRole"),
            ("Version", "2011-06-15"),
            ("RoleArn", role_arn),
            ("RoleSessionName", session_name),
            ("DurationSeconds", duration.as_str()),
        ];
        if let Some(ext) = external_id {
            params.push(("ExternalId", ext));
        }

        let xml = self.query_api(&endpoints.sts(), "us-east-1", "sts", creds, &params).await?;

        let key_id = xml_text(&xml, "AccessKeyId")
            .ok_or_else(|| DriverError::Internal("STS AssumeRole: no AccessKeyId".into()))?;
        let secret = xml_text(&xml, "SecretAccessKey")
            .ok_or_else(|| DriverError::Internal("STS AssumeRole: no SecretAccessKey".into()))?;
        let token = xml_text(&xml, "SessionToken");

        Ok(SigningCredentials { access_key_id: key_id, secret_access_key: secret, session_token: token })
    }
}

mod urlencoding {
    pub fn encode(s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        for byte in s.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
                b' ' => out.push('+'),
                b => out.push_str(&format!("%{:02X}", b)),
            }
        }
        out
    }
}

fn ec2_endpoint(region: &str) -> String {
    format!("https://ec2.{}.amazonaws.com", region)
}

fn rds_endpoint(region: &str) -> String {
    format!("https://rds.{}.amazonaws.com", region)
}

fn ecs_endpoint(region: &str) -> String {
    format!("https://ecs.{}.amazonaws.com", region)
}

fn autoscaling_endpoint(region: &str) -> String {
    format!("https://autoscaling.{}.amazonaws.com", region)
}

fn sts_endpoint() -> String {
    "https://sts.amazonaws.com".to_string()
}

/// Per-service base URLs, real by default and overridable in tests.
#[derive(Clone)]
pub struct Endpoints {
    pub ec2: Option<String>,
    pub rds: Option<String>,
    pub ecs: Option<String>,
    pub autoscaling: Option<String>,
    pub sts: Option<String>,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self { ec2: None, rds: None, ecs: None, autoscaling: None, sts: None }
    }
}

impl Endpoints {
    pub fn ec2(&self, region: &str) -> String {
        self.ec2.clone().unwrap_or_else(|| ec2_endpoint(region))
    }

    pub fn rds(&self, region: &str) -> String {
        self.rds.clone().unwrap_or_else(|| rds_endpoint(region))
    }

    pub fn ecs(&self, region: &str) -> String {
        self.ecs.clone().unwrap_or_else(|| ecs_endpoint(region))
    }

    pub fn autoscaling(&self, region: &str) -> String {
        self.autoscaling.clone().unwrap_or_else(|| autoscaling_endpoint(region))
    }

    pub fn sts(&self) -> String {
        self.sts.clone().unwrap_or_else(sts_endpoint)
    }

    #[cfg(test)]
    pub fn all_pointing_at(base: &str) -> Self {
        Self {
            ec2: Some(base.to_string()),
            rds: Some(base.to_string()),
            ecs: Some(base.to_string()),
            autoscaling: Some(base.to_string()),
            sts: Some(base.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xml_text_finds_simple_element() {
        let xml = "<DescribeInstancesResponse><state><name>running</name></state></DescribeInstancesResponse>";
        assert_eq!(xml_text(xml, "name"), Some("running".into()));
    }

    #[test]
    fn xml_text_returns_none_for_missing() {
        let xml = "<Foo><Bar>baz</Bar></Foo>";
        assert_eq!(xml_text(xml, "Missing"), None);
    }

    #[test]
    fn xml_all_texts_collects_multiple() {
        let xml = "<Result><Ids><id>i-1</id><id>i-2</id></Ids></Result>";
        let texts = xml_all_texts(xml, "id");
        assert_eq!(texts, vec!["i-1".to_string(), "i-2".to_string()]);
    }

    #[test]
    fn endpoints_are_region_scoped() {
        assert_eq!(ec2_endpoint("us-east-1"), "https://ec2.us-east-1.amazonaws.com");
        assert_eq!(autoscaling_endpoint("eu-west-1"), "https://autoscaling.eu-west-1.amazonaws.com");
    }
}
