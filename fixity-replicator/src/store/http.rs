//! S3-compatible object store over HTTP (path-style addressing).

use super::{BucketPermissions, ObjectId, ObjectStore, PutObjectRequest};
use crate::transfer::upload_body::UploadBody;
use crate::utils::errors::StoreError;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, ETAG};
use reqwest::{StatusCode, Url};
use std::time::Duration;

/// Header prefix under which user metadata travels.
const METADATA_HEADER_PREFIX: &str = "x-amz-meta-";

pub struct HttpObjectStore {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpObjectStore {
    /// Store behind an authenticating gateway. `token`, when given, is sent
    /// as a bearer credential on every request; every request is bounded by
    /// `timeout`.
    pub fn new(endpoint: &str, timeout: Duration, token: Option<&str>) -> Result<Self, StoreError> {
        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| StoreError::Transport(format!("invalid store token: {e}")))?;
            value.set_sensitive(true);
            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }

        Self::with_client(builder.build()?, endpoint)
    }

    /// Use a client that already carries its credentials (signing proxy,
    /// custom default headers, client certificates).
    pub fn with_client(client: reqwest::Client, endpoint: &str) -> Result<Self, StoreError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| StoreError::Transport(format!("invalid endpoint {endpoint:?}: {e}")))?;
        if endpoint.cannot_be_a_base() {
            return Err(StoreError::Transport(format!(
                "endpoint {endpoint} cannot carry a path"
            )));
        }

        Ok(Self { client, endpoint })
    }

    /// `{endpoint}/{bucket}/{key}` with each key segment percent-encoded.
    pub fn object_url(&self, bucket: &str, key: &str) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(bucket).extend(key.split('/'));
        }
        url
    }

    pub fn bucket_url(&self, bucket: &str) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(bucket);
        }
        url
    }
}

impl ObjectStore for HttpObjectStore {
    async fn put_object(&self, request: PutObjectRequest) -> Result<ObjectId, StoreError> {
        let url = self.object_url(&request.bucket, &request.key);

        let body = UploadBody::from_file(request.body, request.key.as_str(), request.content_length);

        let mut builder = self
            .client
            .put(url)
            .header(CONTENT_LENGTH, request.content_length)
            .header("content-md5", &request.content_md5);
        for (name, value) in &request.metadata {
            builder = builder.header(format!("{METADATA_HEADER_PREFIX}{name}"), value);
        }

        let response = builder
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let etag = response
                .headers()
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim_matches('"').to_string())
                .unwrap_or_default();
            return Ok(ObjectId(etag));
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(StoreError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    async fn bucket_permissions(&self, bucket: &str) -> Result<BucketPermissions, StoreError> {
        let response = self.client.head(self.bucket_url(bucket)).send().await?;

        match response.status() {
            status if status.is_success() => Ok(BucketPermissions::READ_WRITE),
            StatusCode::FORBIDDEN => Ok(BucketPermissions::default()),
            StatusCode::NOT_FOUND => Err(StoreError::NoSuchBucket(bucket.to_string())),
            status => Err(StoreError::Rejected {
                status: status.as_u16(),
                body: String::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::checksum::md5_bytes;
    use crate::store::{METADATA_MD5, METADATA_MD5_BASE64};
    use std::collections::BTreeMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accept one request, capture it, reply with `response`.
    async fn one_shot_server(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
                        .and_then(|v| v.parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length || n == 0 {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).to_string()
        });

        (format!("http://{addr}"), handle)
    }

    #[test]
    fn test_object_url_encodes_segments() {
        let store = HttpObjectStore::new("http://localhost:9000/", Duration::from_secs(5), None).unwrap();
        let url = store.object_url("archive", "box 1/a#b.tif");
        assert_eq!(url.as_str(), "http://localhost:9000/archive/box%201/a%23b.tif");
        assert_eq!(store.bucket_url("archive").as_str(), "http://localhost:9000/archive");
    }

    #[test]
    fn test_invalid_endpoint() {
        assert!(HttpObjectStore::new("not a url", Duration::from_secs(5), None).is_err());
    }

    #[tokio::test]
    async fn test_put_sends_digest_and_metadata() {
        let (endpoint, server) = one_shot_server(
            "HTTP/1.1 200 OK\r\nETag: \"abc123\"\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let store = HttpObjectStore::new(&endpoint, Duration::from_secs(5), None).unwrap();

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();
        let digest = md5_bytes(b"hello");

        let mut metadata = BTreeMap::new();
        metadata.insert(METADATA_MD5.to_string(), digest.hex.clone());
        metadata.insert(METADATA_MD5_BASE64.to_string(), digest.base64());

        let id = store
            .put_object(PutObjectRequest {
                bucket: "archive".into(),
                key: "prefix/a.txt".into(),
                body: tokio::fs::File::open(&path).await.unwrap(),
                content_length: 5,
                content_md5: digest.base64(),
                metadata,
            })
            .await
            .unwrap();
        assert_eq!(id, ObjectId("abc123".into()));

        let request = server.await.unwrap().to_ascii_lowercase();
        assert!(request.starts_with("put /archive/prefix/a.txt http/1.1"));
        assert!(request.contains(&format!("content-md5: {}", digest.base64().to_ascii_lowercase())));
        assert!(request.contains(&format!("x-amz-meta-fixity-md5: {}", digest.hex)));
        assert!(request.contains("x-amz-meta-fixity-md5b64:"));
        assert!(request.ends_with("hello"));
    }

    #[tokio::test]
    async fn test_rejected_digest_is_error() {
        let (endpoint, _server) = one_shot_server(
            "HTTP/1.1 400 Bad Request\r\nContent-Length: 9\r\nConnection: close\r\n\r\nBadDigest",
        )
        .await;
        let store = HttpObjectStore::new(&endpoint, Duration::from_secs(5), None).unwrap();

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();

        let err = store
            .put_object(PutObjectRequest {
                bucket: "archive".into(),
                key: "a.txt".into(),
                body: tokio::fs::File::open(&path).await.unwrap(),
                content_length: 5,
                content_md5: md5_bytes(b"other").base64(),
                metadata: BTreeMap::new(),
            })
            .await
            .unwrap_err();

        match err {
            StoreError::Rejected { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "BadDigest");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_bucket_permissions_forbidden() {
        let (endpoint, _server) = one_shot_server(
            "HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let store = HttpObjectStore::new(&endpoint, Duration::from_secs(5), None).unwrap();

        let permissions = store.bucket_permissions("archive").await.unwrap();
        assert!(!permissions.write);
    }

    #[tokio::test]
    async fn test_token_is_sent_as_bearer() {
        let (endpoint, server) = one_shot_server(
            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let store =
            HttpObjectStore::new(&endpoint, Duration::from_secs(5), Some("s3cret")).unwrap();

        let permissions = store.bucket_permissions("archive").await.unwrap();
        assert!(permissions.write);

        let request = server.await.unwrap().to_ascii_lowercase();
        assert!(request.starts_with("head /archive http/1.1"));
        assert!(request.contains("authorization: bearer s3cret"));
    }

    #[tokio::test]
    async fn test_injected_client_headers_are_used() {
        let (endpoint, server) = one_shot_server(
            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let mut headers = HeaderMap::new();
        headers.insert("x-gateway-key", HeaderValue::from_static("k-42"));
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .unwrap();
        let store = HttpObjectStore::with_client(client, &endpoint).unwrap();

        store.bucket_permissions("archive").await.unwrap();

        let request = server.await.unwrap().to_ascii_lowercase();
        assert!(request.contains("x-gateway-key: k-42"));
        assert!(!request.contains("authorization:"));
    }

    #[test]
    fn test_token_with_newline_is_rejected() {
        let result = HttpObjectStore::new("http://localhost:9000", Duration::from_secs(5), Some("a\nb"));
        assert!(matches!(result, Err(StoreError::Transport(_))));
    }
}
