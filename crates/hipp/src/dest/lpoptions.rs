// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `lpoptions` file parsing and writing.
//!
//! Line grammar (blank lines and `#` comments ignored):
//!
//! ```text
//! Dest    NAME[/INSTANCE] [OPT[=VALUE] ...]
//! Default NAME[/INSTANCE] [OPT[=VALUE] ...]
//! ```
//!
//! The system file is read first, then the user file; user entries shadow
//! system entries.  At most one `Default` survives; an environment-given
//! default (`LPDEST`/`PRINTER`) suppresses file defaults entirely.

use std::fs;
use std::io::Write as _;
use std::path::Path;

use crate::config::Context;
use crate::dest::options::{options_to_string, parse_options};
use crate::dest::{DestList, Destination};
use crate::error::{Error, Result};

/// User/system option overlays plus the recorded default destination.
#[derive(Debug, Default)]
pub struct Overlay {
    /// Overlay entries, sorted.
    pub dests: DestList,
    /// `NAME` / `NAME/INSTANCE` of the recorded default, if any.
    pub default_name: Option<String>,
}

impl Overlay {
    /// Split the recorded default into name and instance.
    pub fn default_parts(&self) -> (Option<String>, Option<String>) {
        match &self.default_name {
            None => (None, None),
            Some(full) => match full.split_once('/') {
                Some((name, instance)) => {
                    (Some(name.to_string()), Some(instance.to_string()))
                }
                None => (Some(full.clone()), None),
            },
        }
    }
}

/// Parse one file into `overlay`, honoring `user_default_set`.
fn load_file(overlay: &mut Overlay, path: &Path, user_default_set: bool) {
    let Ok(content) = fs::read_to_string(path) else {
        return;
    };

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((keyword, rest)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        let is_default = keyword.eq_ignore_ascii_case("default");
        if !is_default && !keyword.eq_ignore_ascii_case("dest") {
            continue;
        }

        let rest = rest.trim_start();
        let (target, option_str) = match rest.split_once(char::is_whitespace) {
            Some((t, o)) => (t, o),
            None => (rest, ""),
        };
        if target.is_empty() {
            continue;
        }

        let (name, instance) = match target.split_once('/') {
            Some((n, i)) => (n, Some(i)),
            None => (target, None),
        };

        // Merge into an existing entry or create one (no implicit base
        // entry: an instance-only overlay stays instance-only).
        let mut dest = overlay
            .dests
            .get(Some(name), instance)
            .cloned()
            .unwrap_or_else(|| Destination::new(name, instance));

        for (opt_name, opt_value) in parse_options(option_str).iter() {
            dest.options.set(opt_name, opt_value);
        }
        overlay.dests.insert(dest);

        if is_default && !user_default_set {
            overlay.default_name = Some(target.to_string());
            let name = name.to_string();
            let instance = instance.map(str::to_string);
            overlay.dests.set_default(&name, instance.as_deref());
        }
    }
}

/// Load the system overlay then the user overlay.
///
/// `user_default_set` reflects `LPDEST`/`PRINTER`: when the environment
/// names a default, file `Default` lines only contribute options.
pub fn load_overlay(ctx: &Context, user_default_set: bool) -> Overlay {
    let mut overlay = Overlay::default();

    load_file(&mut overlay, &ctx.sys_lpoptions(), user_default_set);
    if let Some(user_path) = ctx.user_lpoptions() {
        load_file(&mut overlay, &user_path, user_default_set);
    }

    log::debug!(
        "[DEST] loaded {} overlay entries, default={:?}",
        overlay.dests.len(),
        overlay.default_name
    );
    overlay
}

/// Write a destination list back out in `lpoptions` grammar.
pub fn save_dests(path: &Path, dests: &DestList) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(Error::Io)?;
    }

    let mut out = String::new();
    for dest in dests.iter() {
        let keyword = if dest.is_default { "Default" } else { "Dest" };
        out.push_str(keyword);
        out.push(' ');
        out.push_str(&dest.full_name());
        let options = options_to_string(&dest.options);
        if !options.is_empty() {
            out.push(' ');
            out.push_str(&options);
        }
        out.push('\n');
    }

    let mut file = fs::File::create(path).map_err(Error::Io)?;
    file.write_all(out.as_bytes()).map_err(Error::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn overlay_from(content: &str) -> Overlay {
        let tmp = tempfile::tempdir().unwrap();
        let sys = tmp.path().join("sys");
        let user = tmp.path().join("user");
        fs::create_dir_all(&sys).unwrap();
        fs::create_dir_all(&user).unwrap();
        fs::write(user.join("lpoptions"), content).unwrap();

        let ctx = Context::for_test(sys, Some(user));
        load_overlay(&ctx, false)
    }

    #[test]
    fn test_parse_dest_and_default() {
        let mut overlay = overlay_from(
            "Default Photo/draft media=na_letter_8.5x11in\nDest Photo/draft media=na_index-4x6_4x6in\n",
        );

        assert_eq!(overlay.default_name.as_deref(), Some("Photo/draft"));
        // Both lines merged into one entry; the later line replaced media.
        assert_eq!(overlay.dests.len(), 1);
        let dest = overlay.dests.get(Some("Photo"), Some("draft")).unwrap();
        assert_eq!(dest.option("media"), Some("na_index-4x6_4x6in"));
        assert!(dest.is_default);
    }

    #[test]
    fn test_comments_and_blanks_ignored() {
        let overlay = overlay_from("# comment line\n\nDest Laser sides=one-sided\n");
        assert_eq!(overlay.dests.len(), 1);
    }

    #[test]
    fn test_quoted_values() {
        let mut overlay = overlay_from("Dest Laser job-sheets=\"standard,none\" title='two words'\n");
        let dest = overlay.dests.get(Some("Laser"), None).unwrap();
        assert_eq!(dest.option("job-sheets"), Some("standard,none"));
        assert_eq!(dest.option("title"), Some("two words"));
    }

    #[test]
    fn test_user_overrides_system() {
        let tmp = tempfile::tempdir().unwrap();
        let sys = tmp.path().join("sys");
        let user = tmp.path().join("user");
        fs::create_dir_all(&sys).unwrap();
        fs::create_dir_all(&user).unwrap();
        fs::write(sys.join("lpoptions"), "Dest Laser media=a4\nDefault Laser\n").unwrap();
        fs::write(user.join("lpoptions"), "Dest Laser media=letter\n").unwrap();

        let ctx = Context::for_test(sys, Some(user));
        let mut overlay = load_overlay(&ctx, false);

        let dest = overlay.dests.get(Some("Laser"), None).unwrap();
        assert_eq!(dest.option("media"), Some("letter"));
        assert_eq!(overlay.default_name.as_deref(), Some("Laser"));
    }

    #[test]
    fn test_env_default_suppresses_file_default() {
        let tmp = tempfile::tempdir().unwrap();
        let user = tmp.path().join("user");
        fs::create_dir_all(&user).unwrap();
        fs::write(user.join("lpoptions"), "Default Photo media=a4\n").unwrap();

        let ctx = Context::for_test(PathBuf::from("/nonexistent"), Some(user));
        let overlay = load_overlay(&ctx, true);

        assert!(overlay.default_name.is_none());
        // The options still loaded.
        assert_eq!(overlay.dests.len(), 1);
    }

    #[test]
    fn test_default_parts() {
        let overlay = overlay_from("Default Photo/draft\n");
        let (name, instance) = overlay.default_parts();
        assert_eq!(name.as_deref(), Some("Photo"));
        assert_eq!(instance.as_deref(), Some("draft"));
    }

    #[test]
    fn test_save_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("lpoptions");

        let mut dests = DestList::new();
        let mut photo = Destination::new("Photo", Some("draft"));
        photo.options.set("media", "na_index-4x6_4x6in");
        photo.is_default = true;
        dests.insert(photo);
        let mut laser = Destination::new("Laser", None);
        laser.options.set("job-name", "weekly report");
        dests.insert(laser);

        save_dests(&path, &dests).unwrap();

        let ctx = Context::for_test(PathBuf::from("/nonexistent"), Some(tmp.path().to_path_buf()));
        let mut loaded = load_overlay(&ctx, false);

        assert_eq!(loaded.default_name.as_deref(), Some("Photo/draft"));
        let photo = loaded.dests.get(Some("Photo"), Some("draft")).unwrap();
        assert_eq!(photo.option("media"), Some("na_index-4x6_4x6in"));
        let laser = loaded.dests.get(Some("Laser"), None).unwrap();
        assert_eq!(laser.option("job-name"), Some("weekly report"));
    }
}
