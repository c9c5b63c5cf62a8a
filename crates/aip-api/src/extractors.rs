//! # Custom Extractors & Validation
//!
//! Provides the [`Validate`] trait for query DTOs, helpers that map axum
//! rejections to [`AppError::BadRequest`], and the multipart readers for
//! the upload endpoints. All validation happens here, before the archival
//! service sees the request.

use std::collections::HashMap;

use aip_core::{SipId, XmlId};
use axum::body::Bytes;
use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::rejection::QueryRejection;
use axum::extract::Query;

use crate::error::AppError;
use crate::orchestration::{StoreRequest, Upload};

/// Trait for request types that can validate their business rules
/// beyond what serde deserialization checks.
pub trait Validate {
    /// Validate business rules. Returns an error message on failure.
    fn validate(&self) -> Result<(), String>;
}

/// Extract query parameters, mapping deserialization errors to
/// [`AppError::BadRequest`].
pub fn extract_query<T>(result: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    result
        .map(|Query(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Extract query parameters and validate them using the [`Validate`] trait.
pub fn extract_validated_query<T: Validate>(
    result: Result<Query<T>, QueryRejection>,
) -> Result<T, AppError> {
    let value = extract_query(result)?;
    value.validate().map_err(AppError::BadRequest)?;
    Ok(value)
}

/// Parse a package id taken from the path.
pub fn parse_sip_id(raw: &str) -> Result<SipId, AppError> {
    SipId::parse(raw).map_err(AppError::from)
}

// -- Multipart --

/// One uploaded file part.
#[derive(Debug, Clone)]
pub struct FilePart {
    pub file_name: Option<String>,
    pub data: Bytes,
}

/// A fully read multipart body, split into file parts and text fields.
#[derive(Debug, Default)]
pub struct MultipartForm {
    files: HashMap<String, FilePart>,
    fields: HashMap<String, String>,
}

/// Parts read as files. Everything else is a text field.
const FILE_PARTS: [&str; 2] = ["sip", "xml"];

impl MultipartForm {
    /// Drain a multipart body.
    ///
    /// A part that appears twice is rejected rather than silently
    /// overwritten.
    pub async fn read(result: Result<Multipart, MultipartRejection>) -> Result<Self, AppError> {
        let mut multipart = result.map_err(|e| AppError::BadRequest(e.body_text()))?;
        let mut form = Self::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if form.files.contains_key(&name) || form.fields.contains_key(&name) {
                return Err(AppError::BadRequest(format!(
                    "multipart part '{name}' given more than once"
                )));
            }

            if FILE_PARTS.contains(&name.as_str()) {
                let file_name = field.file_name().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.body_text()))?;
                form.files.insert(name, FilePart { file_name, data });
            } else {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.body_text()))?;
                form.fields.insert(name, text);
            }
        }
        Ok(form)
    }

    fn take_file(&mut self, name: &str) -> Result<FilePart, AppError> {
        self.files
            .remove(name)
            .ok_or_else(|| AppError::BadRequest(format!("missing multipart file '{name}'")))
    }

    fn take_field(&mut self, name: &str) -> Result<String, AppError> {
        self.take_optional_field(name)
            .ok_or_else(|| AppError::BadRequest(format!("missing multipart field '{name}'")))
    }

    fn take_optional_field(&mut self, name: &str) -> Option<String> {
        self.fields.remove(name).filter(|v| !v.trim().is_empty())
    }

    fn upload(&mut self, part: &str, digest_field: &str) -> Result<Upload, AppError> {
        let file = self.take_file(part)?;
        let digest = self.take_field(digest_field)?;
        let name = file
            .file_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| part.to_string());
        Upload::new(name, &digest, file.data).map_err(AppError::from)
    }

    /// Build a store request from parts `sip`, `xml` and fields
    /// `sipDigest`, `xmlDigest`, optional `id`.
    pub fn into_store_request(mut self) -> Result<StoreRequest, AppError> {
        let id = self
            .take_optional_field("id")
            .map(|raw| parse_sip_id(&raw))
            .transpose()?;
        let sip = self.upload("sip", "sipDigest")?;
        let xml = self.upload("xml", "xmlDigest")?;
        Ok(StoreRequest::new(id, sip, xml))
    }

    /// Build an XML update from part `xml` and field `xmlDigest`.
    pub fn into_xml_update(mut self) -> Result<(XmlId, Upload), AppError> {
        let xml = self.upload("xml", "xmlDigest")?;
        Ok((XmlId::new(), xml))
    }
}
