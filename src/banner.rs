//! Startup banner.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::consts::{AUTHOR, HOMEPAGE, format_number};

/// Server configuration for display in the startup banner.
pub struct BannerInfo<'a> {
    pub listen: SocketAddr,
    pub engine: &'a Path,
    pub scratch_root: &'a Path,
    pub timeout: Option<Duration>,
    pub max_upload_bytes: usize,
    pub swept: usize,
}

/// Render the banner text.
pub fn render_banner(info: &BannerInfo) -> String {
    let timeout = match info.timeout {
        Some(t) => format!("{}s", t.as_secs()),
        None => "none".to_string(),
    };
    format!(
        r#"
   ╔═══════════════════════════════════════╗
   ║           T X B R O K E R             ║
   ║   transactions in, analyses out       ║
   ╚═══════════════════════════════════════╝

   version   {}
   by        {}
   home      {}
   listen    http://{}
   engine    {}
   scratch   {} ({} stale removed)
   timeout   {}
   uploads   {} bytes max
"#,
        env!("CARGO_PKG_VERSION"),
        AUTHOR,
        HOMEPAGE,
        info.listen,
        info.engine.display(),
        info.scratch_root.display(),
        info.swept,
        timeout,
        format_number(info.max_upload_bytes as u64),
    )
}

pub fn print_banner(info: &BannerInfo) {
    println!("{}", render_banner(info));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn info(timeout: Option<Duration>) -> BannerInfo<'static> {
        BannerInfo {
            listen: SocketAddr::from(([127, 0, 0, 1], 3000)),
            engine: Path::new("/opt/analyzer"),
            scratch_root: Path::new("/tmp/txbroker"),
            timeout,
            max_upload_bytes: 536_870_912,
            swept: 2,
        }
    }

    #[test]
    fn banner_shows_settings() {
        let text = render_banner(&info(Some(Duration::from_secs(120))));
        assert!(text.contains("http://127.0.0.1:3000"));
        assert!(text.contains("/opt/analyzer"));
        assert!(text.contains("2 stale removed"));
        assert!(text.contains("120s"));
        assert!(text.contains("536,870,912"));
    }

    #[test]
    fn banner_without_timeout() {
        assert!(render_banner(&info(None)).contains("timeout   none"));
    }

    #[test]
    fn print_banner_does_not_panic() {
        let engine = PathBuf::from("./analyzer");
        print_banner(&BannerInfo {
            engine: &engine,
            ..info(None)
        });
    }
}
