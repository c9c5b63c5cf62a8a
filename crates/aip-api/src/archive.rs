//! Zip assembly for package downloads.
//!
//! Entries are stored without compression: payloads are usually already
//! compressed and the digests clients hold refer to the exact bytes.
//! Entry names are `{sip_id}` and `{sip_id}_xml_{version}`, the same names
//! the object store uses for its keys.

use std::io::{Cursor, Write};

use aip_store::ObjectKey;
use tokio::io::AsyncReadExt;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::ArchivalError;
use crate::orchestration::AipContent;

/// Read every stream of `content` and pack it into a zip archive.
pub async fn build_zip(content: AipContent) -> Result<Vec<u8>, ArchivalError> {
    let AipContent {
        sip,
        mut sip_payload,
        xmls,
    } = content;

    let mut entries: Vec<(String, Vec<u8>)> = Vec::with_capacity(xmls.len() + 1);

    let mut buf = Vec::new();
    sip_payload
        .read_to_end(&mut buf)
        .await
        .map_err(|e| ArchivalError::Storage(format!("reading sip {}: {e}", sip.id)))?;
    entries.push((ObjectKey::sip(&sip.id).as_str().to_string(), buf));

    for (xml, mut reader) in xmls {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.map_err(|e| {
            ArchivalError::Storage(format!("reading xml {} v{}: {e}", sip.id, xml.version))
        })?;
        entries.push((ObjectKey::xml(&sip.id, xml.version).as_str().to_string(), buf));
    }

    tokio::task::spawn_blocking(move || write_entries(entries))
        .await
        .map_err(|e| ArchivalError::Storage(format!("zip task failed: {e}")))?
}

fn write_entries(entries: Vec<(String, Vec<u8>)>) -> Result<Vec<u8>, ArchivalError> {
    let zip_err = |e: zip::result::ZipError| ArchivalError::Storage(format!("zip: {e}"));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .large_file(true);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer.start_file(name, options).map_err(zip_err)?;
        writer
            .write_all(&data)
            .map_err(|e| ArchivalError::Storage(format!("zip: {e}")))?;
    }
    Ok(writer.finish().map_err(zip_err)?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aip_core::{FixityVerifier, SipId, XmlId};
    use aip_state::{AipSip, AipXml};
    use aip_store::ObjectReader;
    use chrono::Utc;
    use std::io::Read;

    fn reader(data: &'static [u8]) -> ObjectReader {
        Box::new(Cursor::new(data))
    }

    #[tokio::test]
    async fn archive_holds_one_entry_per_stream() {
        let now = Utc::now();
        let d = FixityVerifier::new().digest_bytes(b"x");
        let sip_id = SipId::new();
        let sip = AipSip::registered(sip_id, "pkg.zip", d, now);
        let xml1 = AipXml::registered(XmlId::new(), sip_id, "a.xml", d, 1, now);
        let xml2 = AipXml::registered(XmlId::new(), sip_id, "b.xml", d, 2, now);

        let bytes = build_zip(AipContent {
            sip,
            sip_payload: reader(b"SIPDATA"),
            xmls: vec![(xml1, reader(b"<one/>")), (xml2, reader(b"<two/>"))],
        })
        .await
        .unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 3);

        let mut out = String::new();
        archive
            .by_name(&sip_id.to_string())
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "SIPDATA");

        out.clear();
        archive
            .by_name(&format!("{sip_id}_xml_2"))
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "<two/>");
    }
}
