//! MD5 digests required by the sliced upload protocol.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::Result;

/// Length of the leading segment hashed into `slice-md5`.
pub const SLICE_MD5_LEN: u64 = 256 * 1024;

/// Digests of a local file, computed in a single read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    pub size: u64,
    /// MD5 of the whole file.
    pub content_md5: String,
    /// MD5 of the first 256 KiB.
    pub slice_md5: String,
    /// MD5 of every `slice_size` block, in order.
    pub block_list: Vec<String>,
}

impl FileDigest {
    /// Hash `path`, splitting it into blocks of `slice_size` bytes.
    pub fn compute<P: AsRef<Path>>(path: P, slice_size: u64) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut buffer = vec![0u8; 64 * 1024];

        let mut content = md5::Context::new();
        let mut head = md5::Context::new();
        let mut block = md5::Context::new();
        let mut block_list = Vec::new();
        let mut size = 0u64;
        let mut in_block = 0u64;

        loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            let mut data = &buffer[..read];
            content.consume(data);

            if size < SLICE_MD5_LEN {
                let take = (SLICE_MD5_LEN - size).min(data.len() as u64) as usize;
                head.consume(&data[..take]);
            }
            size += read as u64;

            while !data.is_empty() {
                let take = (slice_size - in_block).min(data.len() as u64) as usize;
                block.consume(&data[..take]);
                in_block += take as u64;
                data = &data[take..];
                if in_block == slice_size {
                    let done = std::mem::replace(&mut block, md5::Context::new());
                    block_list.push(format!("{:x}", done.compute()));
                    in_block = 0;
                }
            }
        }

        // A trailing partial block, or the single empty block of an empty file.
        if in_block > 0 || block_list.is_empty() {
            block_list.push(format!("{:x}", block.compute()));
        }

        Ok(Self {
            size,
            content_md5: format!("{:x}", content.compute()),
            slice_md5: format!("{:x}", head.compute()),
            block_list,
        })
    }

    /// `block_list` encoded the way precreate/create expect it.
    pub fn block_list_json(&self) -> String {
        serde_json::to_string(&self.block_list).unwrap_or_else(|_| "[]".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn md5_hex(data: &[u8]) -> String {
        format!("{:x}", md5::compute(data))
    }

    #[test]
    fn test_blocks_split_on_slice_size() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"abcdefghij").unwrap();

        let digest = FileDigest::compute(file.path(), 4).unwrap();
        assert_eq!(digest.size, 10);
        assert_eq!(digest.content_md5, md5_hex(b"abcdefghij"));
        assert_eq!(digest.slice_md5, md5_hex(b"abcdefghij"));
        assert_eq!(
            digest.block_list,
            vec![md5_hex(b"abcd"), md5_hex(b"efgh"), md5_hex(b"ij")]
        );
    }

    #[test]
    fn test_exact_multiple_has_no_empty_tail() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"abcdefgh").unwrap();

        let digest = FileDigest::compute(file.path(), 4).unwrap();
        assert_eq!(digest.block_list, vec![md5_hex(b"abcd"), md5_hex(b"efgh")]);
    }

    #[test]
    fn test_slice_md5_covers_first_256k() {
        let data: Vec<u8> = (0..(SLICE_MD5_LEN as usize + 1000)).map(|i| (i % 251) as u8).collect();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();

        let digest = FileDigest::compute(file.path(), 4 * 1024 * 1024).unwrap();
        assert_eq!(digest.slice_md5, md5_hex(&data[..SLICE_MD5_LEN as usize]));
        assert_eq!(digest.content_md5, md5_hex(&data));
        assert_eq!(digest.block_list.len(), 1);
    }

    #[test]
    fn test_block_list_json_is_compact() {
        let digest = FileDigest {
            size: 1,
            content_md5: String::new(),
            slice_md5: String::new(),
            block_list: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(digest.block_list_json(), r#"["a","b"]"#);
    }
}
