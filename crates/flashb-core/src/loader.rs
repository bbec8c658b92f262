//! ELF section loader.
//!
//! Pulls the `.text` and `.vectors` sections out of a linked firmware
//! image. Only section headers are consulted; program headers and symbols
//! are ignored.

use std::path::Path;

use goblin::elf::Elf;
use goblin::elf::section_header::{SHT_NOBITS, SectionHeader};
use thiserror::Error;
use tracing::{debug, info};

use crate::image::{Image, Section};
use crate::protocol::{TEXT_SECTION, VECTORS_SECTION};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: not a usable ELF file: {source}")]
    Parse {
        path: String,
        #[source]
        source: goblin::error::Error,
    },
    #[error("{path}: no {section} section")]
    MissingSection { path: String, section: &'static str },
    #[error("{path}: {section} has no file contents")]
    NoContents { path: String, section: &'static str },
    #[error("{path}: {section} at 0x{addr:X}+{size} does not fit a 16-bit address space")]
    AddressOutOfRange {
        path: String,
        section: &'static str,
        addr: u64,
        size: u64,
    },
    #[error("{path}: {section} extends past end of file")]
    Truncated { path: String, section: &'static str },
}

/// Load the text and vectors sections of the ELF file at `path`.
pub fn load_sections<P: AsRef<Path>>(path: P) -> Result<Image, LoadError> {
    let path = path.as_ref();
    let shown = path.display().to_string();
    let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
        path: shown.clone(),
        source,
    })?;
    let image = parse_sections(&bytes, &shown)?;
    info!(
        path = %shown,
        text = %format!("0x{:04X}+{}", image.text.start_address, image.text.len()),
        vectors = %format!("0x{:04X}+{}", image.vectors.start_address, image.vectors.len()),
        "Loaded image"
    );
    Ok(image)
}

/// Parse an in-memory ELF file; `path` only labels errors.
pub fn parse_sections(bytes: &[u8], path: &str) -> Result<Image, LoadError> {
    let elf = Elf::parse(bytes).map_err(|source| LoadError::Parse {
        path: path.to_string(),
        source,
    })?;

    let text = extract(&elf, bytes, path, TEXT_SECTION)?;
    let vectors = extract(&elf, bytes, path, VECTORS_SECTION)?;
    Ok(Image::new(text, vectors))
}

fn get_section_by_name<'a>(elf: &'a Elf, name: &str) -> Option<&'a SectionHeader> {
    elf.section_headers
        .iter()
        .find(|section| elf.shdr_strtab.get_at(section.sh_name) == Some(name))
}

fn extract(elf: &Elf, bytes: &[u8], path: &str, name: &'static str) -> Result<Section, LoadError> {
    let header = get_section_by_name(elf, name).ok_or_else(|| LoadError::MissingSection {
        path: path.to_string(),
        section: name,
    })?;

    if header.sh_type == SHT_NOBITS {
        return Err(LoadError::NoContents {
            path: path.to_string(),
            section: name,
        });
    }
    if header.sh_addr.saturating_add(header.sh_size) > u16::MAX as u64 + 1 {
        return Err(LoadError::AddressOutOfRange {
            path: path.to_string(),
            section: name,
            addr: header.sh_addr,
            size: header.sh_size,
        });
    }

    let offset = header.sh_offset as usize;
    let data = offset
        .checked_add(header.sh_size as usize)
        .and_then(|end| bytes.get(offset..end))
        .ok_or_else(|| LoadError::Truncated {
            path: path.to_string(),
            section: name,
        })?;

    debug!(section = name, addr = %format!("0x{:04X}", header.sh_addr), size = data.len(), "Extracted section");
    Ok(Section::new(name, header.sh_addr as u16, data.to_vec()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    const SHSTRTAB: &[u8] = b"\0.text\0.vectors\0.shstrtab\0";

    fn push_u16(buf: &mut Vec<u8>, v: u16) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn push_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn section_header(buf: &mut Vec<u8>, name: u32, kind: u32, addr: u32, offset: u32, size: u32) {
        for v in [name, kind, 0, addr, offset, size, 0, 0, 1, 0] {
            push_u32(buf, v);
        }
    }

    /// Minimal little-endian ELF32 with `.text`, `.vectors` and `.shstrtab`.
    pub(crate) fn build_elf(text_addr: u32, text: &[u8], vectors_addr: u32, vectors: &[u8]) -> Vec<u8> {
        const EHSIZE: u32 = 52;
        let text_off = EHSIZE;
        let vectors_off = text_off + text.len() as u32;
        let strtab_off = vectors_off + vectors.len() as u32;
        let shoff = (strtab_off + SHSTRTAB.len() as u32 + 3) & !3;

        let mut buf = vec![0x7F, b'E', b'L', b'F', 1, 1, 1, 0];
        buf.resize(16, 0);
        push_u16(&mut buf, 2); // ET_EXEC
        push_u16(&mut buf, 105); // EM_MSP430
        push_u32(&mut buf, 1);
        push_u32(&mut buf, text_addr);
        push_u32(&mut buf, 0); // e_phoff
        push_u32(&mut buf, shoff);
        push_u32(&mut buf, 0);
        push_u16(&mut buf, EHSIZE as u16);
        push_u16(&mut buf, 32);
        push_u16(&mut buf, 0); // e_phnum
        push_u16(&mut buf, 40);
        push_u16(&mut buf, 4); // e_shnum
        push_u16(&mut buf, 3); // e_shstrndx

        buf.extend_from_slice(text);
        buf.extend_from_slice(vectors);
        buf.extend_from_slice(SHSTRTAB);
        buf.resize(shoff as usize, 0);

        section_header(&mut buf, 0, 0, 0, 0, 0);
        section_header(&mut buf, 1, 1, text_addr, text_off, text.len() as u32);
        section_header(&mut buf, 7, 1, vectors_addr, vectors_off, vectors.len() as u32);
        section_header(&mut buf, 16, 3, 0, strtab_off, SHSTRTAB.len() as u32);
        buf
    }

    #[test]
    fn test_extracts_sections() {
        let text: Vec<u8> = (0..40).collect();
        let vectors = [0xEEu8; 32];
        let elf = build_elf(0xC000, &text, 0xFFE0, &vectors);

        let image = parse_sections(&elf, "bottom.elf").unwrap();
        assert_eq!(image.text.name, ".text");
        assert_eq!(image.text.start_address, 0xC000);
        assert_eq!(image.text.data, text);
        assert_eq!(image.vectors.start_address, 0xFFE0);
        assert_eq!(image.vectors.data, vectors);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            parse_sections(b"not an elf file at all, really", "x"),
            Err(LoadError::Parse { .. })
        ));
    }

    #[test]
    fn test_rejects_wide_address() {
        let elf = build_elf(0x1_0000, &[0u8; 16], 0xFFE0, &[0u8; 32]);
        assert!(matches!(
            parse_sections(&elf, "x"),
            Err(LoadError::AddressOutOfRange { section: ".text", .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_sections("/nonexistent/flashb/image.elf"),
            Err(LoadError::Io { .. })
        ));
    }

    #[test]
    fn test_loads_from_disk() {
        let text: Vec<u8> = (0..48).collect();
        let path = std::env::temp_dir().join(format!("flashb-load-{}.elf", std::process::id()));
        std::fs::write(&path, build_elf(0xE000, &text, 0xFFE0, &[0x55; 32])).unwrap();

        let image = load_sections(&path);
        std::fs::remove_file(&path).unwrap();
        let image = image.unwrap();
        assert_eq!(image.text.start_address, 0xE000);
        assert_eq!(image.text.data, text);
        assert_eq!(image.vectors.data, vec![0x55; 32]);
    }
}
