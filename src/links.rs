// Opening social links in the user's browser.

use std::process::{Child, Command};

use log::{debug, info, warn};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use url::Url;

/// Something that can show a URL to the user.
pub trait LinkOpener {
    fn open(&mut self, url: &str) -> std::io::Result<()>;
}

/// Only well-formed absolute http(s) URLs with a host are opened.
pub fn is_openable(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https") && parsed.host().is_some(),
        Err(_) => false,
    }
}

/// Hands the URL to the platform's default handler. The launcher process is
/// waited on from the runtime's blocking pool so it never lingers as a zombie.
#[derive(Debug)]
pub struct SystemOpener {
    runtime: Handle,
}

impl SystemOpener {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    fn reap(&self, mut child: Child) -> JoinHandle<()> {
        self.runtime.spawn_blocking(move || match child.wait() {
            Ok(status) => debug!("Link opener exited with {status}"),
            Err(err) => warn!("Failed to wait for link opener: {err}"),
        })
    }

    fn launch(url: &str) -> std::io::Result<Child> {
        #[cfg(target_os = "windows")]
        {
            // The empty title keeps `start` from treating the URL as one.
            Command::new("cmd").args(["/C", "start", "", url]).spawn()
        }

        #[cfg(target_os = "macos")]
        {
            Command::new("open").arg(url).spawn()
        }

        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            Command::new("xdg-open").arg(url).spawn()
        }
    }
}

impl LinkOpener for SystemOpener {
    fn open(&mut self, url: &str) -> std::io::Result<()> {
        info!("Opening {url}");
        let child = Self::launch(url)?;
        self.reap(child);
        Ok(())
    }
}

/// Open `url` if it is well formed, logging failures instead of surfacing them.
pub fn open_link(opener: &mut dyn LinkOpener, url: &str) {
    if !is_openable(url) {
        warn!("Ignoring malformed link {url:?}");
        return;
    }
    if let Err(err) = opener.open(url) {
        warn!("Failed to open {url}: {err}");
    }
}

/// Records URLs instead of opening them.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingOpener {
    pub opened: Vec<String>,
}

#[cfg(test)]
impl LinkOpener for RecordingOpener {
    fn open(&mut self, url: &str) -> std::io::Result<()> {
        self.opened.push(url.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_http_urls_are_openable() {
        assert!(is_openable("https://t.me/nomadicaddict"));
        assert!(is_openable("http://example.com"));
        assert!(!is_openable("https://"));
        assert!(!is_openable("ftp://example.com"));
        assert!(!is_openable("https://exa mple.com"));
        assert!(!is_openable(""));
        assert!(!is_openable("https://:::"));
        assert!(!is_openable("https://["));
        assert!(!is_openable("http://a:99999999"));
        assert!(!is_openable("https:///"));
        assert!(!is_openable("mailto:someone@example.com"));
        assert!(is_openable("https://www.tiktok.com/@smartenspaces?_t=ZP-8zVlEv7Dvkl&_r=1"));
    }

    #[test]
    fn malformed_links_are_not_handed_to_the_opener() {
        let mut opener = RecordingOpener::default();
        open_link(&mut opener, "javascript:alert(1)");
        open_link(&mut opener, "https://wa.me/918668824809");
        assert_eq!(opener.opened, vec!["https://wa.me/918668824809"]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn system_opener_reaps_launcher() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let opener = SystemOpener::new(runtime.handle().clone());
        // A child that exits immediately stands in for the platform launcher.
        let child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        runtime.block_on(opener.reap(child)).unwrap();
        assert!(!std::path::Path::new(&format!("/proc/{pid}")).exists());
    }
}
