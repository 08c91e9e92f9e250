use crate::error::{Error, Result};

/// Normalize a key: strip leading/trailing slashes, reject `..` segments,
/// collapse `.` segments and repeated slashes.
///
/// Unlike a directory path, a key must name a file, so the root (empty
/// string or only slashes) is rejected, as is anything inside `.git`.
///
/// # Errors
/// Returns [`Error::InvalidPath`] if the key is empty, contains `..`, or
/// points into the repository's `.git` directory.
pub fn normalize_key(key: &str) -> Result<String> {
    let mut segments: Vec<&str> = Vec::new();
    for seg in key.split('/') {
        if seg.is_empty() || seg == "." {
            continue;
        }
        if seg == ".." {
            return Err(Error::invalid_path(format!(
                "key segment '{}' is not allowed: {}",
                seg, key,
            )));
        }
        segments.push(seg);
    }

    if segments.is_empty() {
        return Err(Error::invalid_path(format!("key must name a file: {:?}", key)));
    }

    if segments[0] == ".git" {
        return Err(Error::invalid_path(format!(
            "key must not point inside .git: {}",
            key
        )));
    }

    Ok(segments.join("/"))
}

/// Validate a branch name.
///
/// Rejects colons (they split refspecs), spaces, tabs, control characters,
/// `..`, `@{`, a leading `-` or `/`, trailing `.` or `/`, and the `.lock`
/// suffix, following git's `check-ref-format` rules.
///
/// # Errors
/// Returns [`Error::InvalidRefName`] if the name violates any rule.
pub fn validate_branch_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_ref_name("branch name must not be empty"));
    }

    for ch in name.chars() {
        match ch {
            ':' | ' ' | '\t' | '\n' | '\r' | '\\' | '^' | '~' | '?' | '*' | '[' => {
                return Err(Error::invalid_ref_name(format!(
                    "branch name contains invalid character: {:?}",
                    ch,
                )));
            }
            c if c.is_control() => {
                return Err(Error::invalid_ref_name(format!(
                    "branch name contains control character: {:?}",
                    c,
                )));
            }
            _ => {}
        }
    }

    if name.starts_with('-') || name.starts_with('/') || name.ends_with('/') {
        return Err(Error::invalid_ref_name(format!(
            "branch name must not start with '-' or '/' or end with '/': {}",
            name
        )));
    }

    if name.contains("..") {
        return Err(Error::invalid_ref_name("branch name must not contain '..'"));
    }

    if name.contains("@{") {
        return Err(Error::invalid_ref_name("branch name must not contain '@{'"));
    }

    if name.ends_with('.') {
        return Err(Error::invalid_ref_name("branch name must not end with '.'"));
    }

    if name.ends_with(".lock") {
        return Err(Error::invalid_ref_name(
            "branch name must not end with '.lock'",
        ));
    }

    Ok(())
}

/// Full local ref name for a branch.
pub fn branch_ref(branch: &str) -> String {
    format!("refs/heads/{}", branch)
}

/// Format the message for a commit touching `keys`.
///
/// If `message` is `Some`, it is used directly. Otherwise a single key gives
/// `"gitkv: <key>"` and several keys give a subject line plus one key per line.
pub fn format_commit_message<S: AsRef<str>>(keys: &[S], message: Option<&str>) -> String {
    if let Some(msg) = message {
        return msg.to_string();
    }
    match keys {
        [] => "gitkv: no changes".to_string(),
        [only] => format!("gitkv: {}", only.as_ref()),
        many => {
            let list: Vec<&str> = many.iter().map(|k| k.as_ref()).collect();
            format!("gitkv: update {} keys\n\n{}", many.len(), list.join("\n"))
        }
    }
}
