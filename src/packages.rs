//! Package include/exclude lists.
//!
//! One package name per line. Blank lines and `#` comments (whole-line or
//! trailing) are ignored. Names are not checked against any package index;
//! apt is the authority on whether a name is valid.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

/// Ordered list of package names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageList {
    names: Vec<String>,
}

impl PackageList {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Read and parse a list file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading package list '{}'", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing package list '{}'", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut names = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = match raw.find('#') {
                Some(pos) => &raw[..pos],
                None => raw,
            }
            .trim();
            if line.is_empty() {
                continue;
            }
            if line.split_whitespace().count() > 1 {
                bail!(
                    "line {}: expected one package per line, got '{}'",
                    idx + 1,
                    line
                );
            }
            names.push(line.to_string());
        }
        Ok(Self { names })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let list = PackageList::parse(
            "# desktop\nxfce4\n\n  lightdm  \n# tools\ncurl # for downloads\n",
        )
        .unwrap();
        assert_eq!(list.names(), ["xfce4", "lightdm", "curl"]);
    }

    #[test]
    fn test_parse_preserves_order() {
        let list = PackageList::parse("git\ncurl\nvim\n").unwrap();
        assert_eq!(list.iter().collect::<Vec<_>>(), vec!["git", "curl", "vim"]);
    }

    #[test]
    fn test_parse_empty() {
        let list = PackageList::parse("# nothing here\n\n").unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn test_parse_rejects_two_names_on_a_line() {
        let err = PackageList::parse("curl git\n").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_load_missing_file_names_path() {
        let err = PackageList::load(Path::new("/nonexistent/include.list")).unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/include.list"));
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("exclude.list");
        fs::write(&path, "thunderbird\nlibreoffice-core\n").unwrap();
        let list = PackageList::load(&path).unwrap();
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_shipped_lists_parse() {
        let config = crate::config::BuildConfig::default();
        let include = PackageList::load(&config.packages.include).unwrap();
        let exclude = PackageList::load(&config.packages.exclude).unwrap();
        assert!(include.iter().any(|p| p == "casper"));
        assert!(include.iter().all(|p| !exclude.iter().any(|e| e == p)));
    }
}
