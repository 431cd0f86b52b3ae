use crate::Error;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier};
use bytes::Bytes;

/// Objects at or above this size are written with a multipart upload.
const MULTIPART_THRESHOLD: usize = 16 * 1024 * 1024;
const PART_SIZE: usize = 8 * 1024 * 1024;

/// S3-backed repository. Repository paths map directly onto object keys,
/// below an optional key prefix.
#[derive(Clone)]
pub struct S3Repository {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: Option<String>,
}

impl S3Repository {
    pub async fn open(
        bucket: &str,
        region: &str,
        prefix: Option<&str>,
        access_key: Option<&str>,
        secret_key: Option<&str>,
    ) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()));

        // Explicit keys from config win over the ambient AWS environment.
        if let (Some(access_key), Some(secret_key)) = (access_key, secret_key) {
            loader = loader.credentials_provider(aws_credential_types::Credentials::new(
                access_key, secret_key, None, None, "harvest-config",
            ));
        }
        let sdk_config = loader.load().await;

        Self {
            client: aws_sdk_s3::Client::new(&sdk_config),
            bucket: bucket.to_string(),
            prefix: prefix.map(|p| p.trim_matches('/').to_string()),
        }
    }

    fn key(&self, path: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{path}"),
            None => path.to_string(),
        }
    }

    fn err(
        operation: &'static str,
        key: &str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Error {
        Error::S3 {
            operation,
            key: key.to_string(),
            source: Box::new(source),
        }
    }

    pub async fn put(&self, path: &str, bytes: Bytes) -> Result<(), Error> {
        let key = self.key(path);
        if bytes.len() >= MULTIPART_THRESHOLD {
            return self.put_multipart(&key, bytes).await;
        }
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|err| Self::err("put_object", &key, err))?;
        Ok(())
    }

    async fn put_multipart(&self, key: &str, bytes: Bytes) -> Result<(), Error> {
        let upload = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| Self::err("create_multipart_upload", key, err))?;
        let upload_id = upload.upload_id().unwrap_or_default().to_string();

        let mut parts = Vec::new();
        for (index, chunk) in bytes.chunks(PART_SIZE).enumerate() {
            let part_number = index as i32 + 1;
            let part = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(&upload_id)
                .part_number(part_number)
                .body(ByteStream::from(Bytes::copy_from_slice(chunk)))
                .send()
                .await
                .map_err(|err| Self::err("upload_part", key, err))?;
            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(part.e_tag().map(str::to_string))
                    .build(),
            );
        }

        let part_count = parts.len();
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|err| Self::err("complete_multipart_upload", key, err))?;
        tracing::debug!(key, parts = part_count, "completed multipart upload");
        Ok(())
    }

    pub async fn has(&self, path: &str) -> Result<bool, Error> {
        let key = self.key(path);
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(head) => Ok(head.content_length().unwrap_or(0) > 0),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(false),
            Err(err) => Err(Self::err("head_object", &key, err)),
        }
    }

    pub async fn get(&self, path: &str) -> Result<Option<Bytes>, Error> {
        let key = self.key(path);
        let object = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(object) => object,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                return Ok(None)
            }
            Err(err) => return Err(Self::err("get_object", &key, err)),
        };
        let body = object
            .body
            .collect()
            .await
            .map_err(|err| Self::err("get_object", &key, err))?;
        Ok(Some(body.into_bytes()))
    }

    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let key_prefix = self.key(prefix);
        let strip = match &self.prefix {
            Some(p) => format!("{p}/"),
            None => String::new(),
        };

        let mut out = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&key_prefix)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|err| Self::err("list_objects_v2", &key_prefix, err))?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    out.push(key.strip_prefix(&strip).unwrap_or(key).to_string());
                }
            }
        }
        Ok(out)
    }

    pub async fn delete_prefix(&self, prefix: &str) -> Result<(), Error> {
        let keys = self.list_prefix(prefix).await?;

        // DeleteObjects accepts at most 1000 keys per request.
        for batch in keys.chunks(1000) {
            let mut objects = Vec::with_capacity(batch.len());
            for path in batch {
                let key = self.key(path);
                objects.push(
                    ObjectIdentifier::builder()
                        .key(&key)
                        .build()
                        .map_err(|err| Self::err("delete_objects", &key, err))?,
                );
            }
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .build()
                .map_err(|err| Self::err("delete_objects", prefix, err))?;
            self.client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|err| Self::err("delete_objects", prefix, err))?;
        }
        Ok(())
    }
}
