//! Virtual identifier synthesis.

use rand::Rng;

/// Attempts made before giving up on a name.
pub const MAX_NAME_ATTEMPTS: usize = 16;

/// Directory under the virtual root that holds placeholder identifiers.
pub const PLACEHOLDER_DIRECTORY: &str = "~placeholder";

/// Generates collision-free identifiers inside a virtual root.
///
/// The first candidate keeps the file name (`<root>\a.txt`); later ones add
/// a random suffix to the stem (`<root>\a_1f03c9d2.txt`).
#[derive(Debug, Clone)]
pub struct VirtualNameGenerator {
    root: String,
    max_attempts: usize,
}

impl VirtualNameGenerator {
    pub fn new(root: &str) -> Self {
        Self {
            root: root.trim_end_matches('\\').to_string(),
            max_attempts: MAX_NAME_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// The first candidate for `file_name` accepted by `is_free`, or `None`
    /// once every attempt was rejected.
    pub fn generate(&self, file_name: &str, is_free: impl Fn(&str) -> bool) -> Option<String> {
        let file_name = if file_name.is_empty() { "_" } else { file_name };
        let mut rng = rand::thread_rng();

        (0..self.max_attempts)
            .map(|attempt| {
                if attempt == 0 {
                    format!("{}\\{}", self.root, file_name)
                } else {
                    let suffix: u32 = rng.gen();
                    format!("{}\\{}", self.root, suffixed(file_name, suffix))
                }
            })
            .find(|candidate| is_free(candidate))
    }

    /// A transient identifier for a resource that must not be created.
    pub fn placeholder(&self, file_name: &str) -> String {
        format!("{}\\{}\\{}", self.root, PLACEHOLDER_DIRECTORY, file_name)
    }
}

fn suffixed(file_name: &str, suffix: u32) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => {
            format!("{}_{:08x}.{}", stem, suffix, extension)
        }
        _ => format!("{}_{:08x}", file_name, suffix),
    }
}
