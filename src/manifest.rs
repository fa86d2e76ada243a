//! Sample manifest payload used by the archival layers above the codec.

use crate::error::PackError;
use crate::reader::PackReader;
use crate::writer::PackWriter;

/// Per-file manifest data. Field ids are fixed for compatibility; fields
/// holding their default value are elided from the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestFileData {
    pub user_name: String,
    pub favourite_number: i64,
    pub interests: Vec<String>,
}

impl ManifestFileData {
    const USER_NAME: u32 = 1;
    const FAVOURITE_NUMBER: u32 = 2;
    const INTERESTS: u32 = 3;

    pub fn to_pack(&self) -> Result<Vec<u8>, PackError> {
        let mut writer = PackWriter::new(Vec::new());

        writer.write_str_opt(
            Self::USER_NAME,
            Some(self.user_name.as_str()).filter(|s| !s.is_empty()),
        )?;
        writer.write_i64_opt(Self::FAVOURITE_NUMBER, self.favourite_number, 0)?;
        if !self.interests.is_empty() {
            writer.begin_array(Self::INTERESTS)?;
            for interest in &self.interests {
                writer.write_str(0, interest)?;
            }
            writer.end_array()?;
        }

        writer.finish()
    }

    pub fn from_pack(data: &[u8]) -> Result<Self, PackError> {
        let mut reader = PackReader::from_slice(data);

        let user_name = reader.read_str_opt(Self::USER_NAME)?.unwrap_or_default();
        let favourite_number = reader.read_i64_opt(Self::FAVOURITE_NUMBER, 0)?;
        let mut interests = Vec::new();
        if !reader.null(Self::INTERESTS)? {
            reader.begin_array(Self::INTERESTS)?;
            while reader.next()? {
                let id = reader.id().expect("cached field");
                interests.push(reader.read_str(id)?);
            }
            reader.end_array()?;
        }
        reader.finish()?;

        Ok(Self {
            user_name,
            favourite_number,
            interests,
        })
    }
}
