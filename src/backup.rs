use crate::db;
use crate::ingest::schema::EntityKind;
use anyhow::{anyhow, Context};
use rusqlite::Connection;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
pub const ARCHIVE_FORMAT_V1: &str = "tracker-csv-archive-v1";

#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    pub archive_format: String,
    pub entry_count: usize,
    pub rows: Vec<(EntityKind, usize)>,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn entry_name(kind: EntityKind) -> String {
    format!("{}.csv", kind.as_str())
}

/// CSV text for one entity kind. Returns bytes and data row count.
pub fn entity_csv(conn: &Connection, kind: EntityKind) -> anyhow::Result<(Vec<u8>, usize)> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    let rows = match kind {
        EntityKind::Students => {
            wtr.write_record(["ID", "Name", "Class", "Section", "DOB", "Created"])?;
            let students = db::list_students(conn).context("failed to load students")?;
            for s in &students {
                wtr.write_record([
                    s.id.to_string().as_str(),
                    s.name.as_str(),
                    s.class.as_str(),
                    s.section.as_str(),
                    s.dob.as_deref().unwrap_or(""),
                    s.created_at.as_str(),
                ])?;
            }
            students.len()
        }
        EntityKind::Subjects => {
            wtr.write_record(["ID", "Subject Name", "Created"])?;
            let subjects = db::list_subjects(conn).context("failed to load subjects")?;
            for s in &subjects {
                wtr.write_record([
                    s.id.to_string().as_str(),
                    s.name.as_str(),
                    s.created_at.as_str(),
                ])?;
            }
            subjects.len()
        }
        EntityKind::Marks => {
            wtr.write_record([
                "Mark ID",
                "Student",
                "Subject",
                "Marks Obtained",
                "Max Marks",
                "Assessment Date",
                "Assessment Type",
                "Created",
                "Student ID",
                "Subject ID",
            ])?;
            let marks = db::list_marks(conn).context("failed to load marks")?;
            for m in &marks {
                wtr.write_record([
                    m.id.to_string(),
                    m.student_name.clone(),
                    m.subject_name.clone(),
                    m.marks_obtained.to_string(),
                    m.max_marks.to_string(),
                    m.assessment_date.clone(),
                    m.assessment_type.clone(),
                    m.created_at.clone(),
                    m.student_id.to_string(),
                    m.subject_id.to_string(),
                ])?;
            }
            marks.len()
        }
    };
    let bytes = wtr
        .into_inner()
        .map_err(|e| anyhow!("failed to flush csv: {}", e))?;
    Ok((bytes, rows))
}

fn create_parent(out_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    Ok(())
}

pub fn export_entity_csv(
    conn: &Connection,
    kind: EntityKind,
    out_path: &Path,
) -> anyhow::Result<usize> {
    let (bytes, rows) = entity_csv(conn, kind)?;
    create_parent(out_path)?;
    std::fs::write(out_path, bytes)
        .with_context(|| format!("failed to write {}", out_path.to_string_lossy()))?;
    Ok(rows)
}

/// Zip of one CSV per entity kind plus a manifest carrying each entry's SHA-256.
pub fn export_csv_archive(conn: &Connection, out_path: &Path) -> anyhow::Result<ArchiveSummary> {
    create_parent(out_path)?;
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries = Vec::new();
    let mut rows = Vec::new();
    for kind in EntityKind::ALL {
        let name = entry_name(kind);
        let (bytes, count) = entity_csv(conn, kind)?;
        zip.start_file(name.as_str(), opts)
            .with_context(|| format!("failed to start {} entry", name))?;
        zip.write_all(&bytes)
            .with_context(|| format!("failed to write {} entry", name))?;
        entries.push(json!({
            "name": name,
            "kind": kind,
            "rows": count,
            "sha256": sha256_hex(&bytes),
        }));
        rows.push((kind, count));
    }

    let manifest = json!({
        "format": ARCHIVE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": db::now_timestamp(),
        "entries": entries,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.finish().context("failed to finalize zip archive")?;

    Ok(ArchiveSummary {
        archive_format: ARCHIVE_FORMAT_V1.to_string(),
        entry_count: entries.len() + 1,
        rows,
    })
}

/// Re-reads an archive and checks every manifest checksum.
pub fn verify_csv_archive(in_path: &Path) -> anyhow::Result<ArchiveSummary> {
    if !is_zip_file(in_path)? {
        return Err(anyhow!("not a zip archive: {}", in_path.to_string_lossy()));
    }
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open archive {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("archive missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != ARCHIVE_FORMAT_V1 {
        return Err(anyhow!("unsupported archive format: {}", format));
    }

    let entries = manifest
        .get("entries")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("manifest.json has no entries"))?;
    let mut rows = Vec::new();
    for entry in entries {
        let name = entry
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("manifest entry without name"))?;
        let expected = entry.get("sha256").and_then(|v| v.as_str()).unwrap_or("");
        let mut bytes = Vec::new();
        archive
            .by_name(name)
            .with_context(|| format!("archive missing {}", name))?
            .read_to_end(&mut bytes)
            .with_context(|| format!("failed to read {}", name))?;
        let actual = sha256_hex(&bytes);
        if actual != expected {
            return Err(anyhow!("checksum mismatch for {}", name));
        }
        let kind = entry
            .get("kind")
            .and_then(|v| v.as_str())
            .and_then(EntityKind::parse)
            .ok_or_else(|| anyhow!("manifest entry {} has unknown kind", name))?;
        let count = entry.get("rows").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let mut rdr = csv::Reader::from_reader(bytes.as_slice());
        let mut actual_rows = 0usize;
        for record in rdr.records() {
            record.with_context(|| format!("{} is not valid CSV", name))?;
            actual_rows += 1;
        }
        if actual_rows != count {
            return Err(anyhow!(
                "row count mismatch for {}: manifest says {}, found {}",
                name,
                count,
                actual_rows
            ));
        }
        rows.push((kind, count));
    }

    Ok(ArchiveSummary {
        archive_format: format.to_string(),
        entry_count: entries.len() + 1,
        rows,
    })
}

fn is_zip_file(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 4];
    let read = f.read(&mut sig).context("failed to read file signature")?;
    if read < 4 {
        return Ok(false);
    }
    Ok(sig == [0x50, 0x4B, 0x03, 0x04])
}
