//! Content fingerprint used to detect "nothing changed".

use sha2::{Digest, Sha256};

/// Separator between relative paths in the path listing.
const PATH_SEPARATOR: &[u8] = b"\n";

/// SHA-256 over the sorted path listing, then every file's length and bytes
/// in the same order, then the serialized credential record if any.
///
/// `files` must already be sorted by path.
pub fn fingerprint<'a, I>(files: I, credential: Option<&str>) -> String
where
    I: IntoIterator<Item = (&'a str, &'a [u8])> + Clone,
{
    let mut hasher = Sha256::new();

    for (index, (path, _)) in files.clone().into_iter().enumerate() {
        if index > 0 {
            hasher.update(PATH_SEPARATOR);
        }
        hasher.update(path.as_bytes());
    }

    for (_, contents) in files {
        // length prefix keeps bytes from shifting between adjacent files
        hasher.update((contents.len() as u64).to_le_bytes());
        hasher.update(contents);
    }

    if let Some(credential) = credential {
        hasher.update(credential.as_bytes());
    }

    hex::encode(hasher.finalize())
}
