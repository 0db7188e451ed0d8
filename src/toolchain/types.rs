use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Everything the driver learns about the host in one probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Toolchain {
    /// Absolute path to the C compiler driver.
    pub cc_path: PathBuf,
    /// Absolute path to the C++ compiler driver.
    pub cxx_path: PathBuf,
    /// Absolute path to the archiver.
    pub ar_path: PathBuf,
    /// First line of `cc --version`, for diagnostics only; cache
    /// invalidation keys on the paths.
    pub version: String,
    /// The driver's `#include <...>` search path, used to exclude
    /// system headers from discovered dependencies.
    pub system_includes: Vec<PathBuf>,
    /// Host byte order, as reported at probe time.
    pub endianness: String,
    /// Detected core count; the scheduler's default pool size.
    pub cores: usize,
}

impl Toolchain {
    /// The driver for a given language or link step.
    pub fn driver(&self, cxx: bool) -> &PathBuf {
        if cxx {
            &self.cxx_path
        } else {
            &self.cc_path
        }
    }

    /// True if `path` lives under one of the system include roots.
    pub fn is_system_header(&self, path: &std::path::Path) -> bool {
        self.system_includes.iter().any(|d| path.starts_with(d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn probe() -> Toolchain {
        Toolchain {
            cc_path: PathBuf::from("/usr/bin/cc"),
            cxx_path: PathBuf::from("/usr/bin/c++"),
            ar_path: PathBuf::from("/usr/bin/ar"),
            version: "cc 12.0".into(),
            system_includes: vec![PathBuf::from("/usr/include"), PathBuf::from("/usr/lib/gcc")],
            endianness: "little".into(),
            cores: 8,
        }
    }

    #[test]
    fn system_header_classification() {
        let tc = probe();
        assert!(tc.is_system_header(Path::new("/usr/include/stdio.h")));
        assert!(tc.is_system_header(Path::new("/usr/lib/gcc/include/stddef.h")));
        assert!(!tc.is_system_header(Path::new("/home/dev/proj/planet.h")));
    }

    #[test]
    fn driver_selection() {
        let tc = probe();
        assert_eq!(tc.driver(false), &PathBuf::from("/usr/bin/cc"));
        assert_eq!(tc.driver(true), &PathBuf::from("/usr/bin/c++"));
    }
}
