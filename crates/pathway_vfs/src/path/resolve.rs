use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, instrument, trace};

use pathway_base::{PathwayError, PathwayResult};

use super::cache::CacheKey;
use super::net::{HTTP_PORT, HTTPS_PORT, parse_authority};
use super::normalize::{is_drive_designator, scan_scheme, split_query, unescape_url};
use super::{Path, PathKind, normalize};

/* 📖 # How a lookup is resolved

1. A leading `scheme:` selects a prototype from the scheme map of the resolving path. An
   unknown scheme still resolves, to a path of kind NotFound.
2. Without a scheme the string is relative to the resolving path and stays in its scheme and
   sandbox.
3. Hierarchical schemes normalize the path. Network schemes parse `//authority` first.

The result carries the scheme map of the path it was resolved against, so a sandbox with an
empty map can never reach another scheme. Plain local and memory lookups are cached per
runtime; the cache key includes the sandbox root and the scheme map identity.
*/

pub(crate) fn strip_trailing_slash(mut path: String) -> String {
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    path
}

impl Path {
    /// Resolves `user_path` relative to this path.
    pub fn lookup(&self, user_path: &str) -> PathwayResult<Path> {
        self.lookup_with(user_path, None)
    }

    /// Resolves `user_path` and attaches `attributes` to the result.
    ///
    /// For http paths the attributes become request headers, except `virtual-host` which
    /// replaces the Host header and `connect-timeout`/`read-timeout` in milliseconds.
    pub fn lookup_with(
        &self,
        user_path: &str,
        attributes: Option<&BTreeMap<String, String>>,
    ) -> PathwayResult<Path> {
        let cache = match attributes {
            None if self.is_cacheable() => self.context().cache(),
            _ => None,
        };
        let Some(cache) = cache else {
            return self.resolve(user_path, attributes);
        };
        let key = CacheKey {
            base: self.url(),
            root: Arc::from(self.root()),
            schemes: self.schemes().id(),
            user_path: user_path.to_string(),
        };
        if let Some(hit) = cache.get(&key) {
            trace!(user_path, "path cache hit");
            return Ok(hit);
        }
        let resolved = self.resolve(user_path, None)?;
        if resolved.is_cacheable() {
            cache.put(key, resolved.clone());
        }
        Ok(resolved)
    }

    fn is_cacheable(&self) -> bool {
        matches!(self.kind(), PathKind::Local | PathKind::Memory(_)) && self.attributes().is_empty()
    }

    /// Child of a local or memory directory, bypassing scheme dispatch and the cache.
    pub(crate) fn child(&self, relative: &str) -> Path {
        let path = normalize(self.path(), relative.trim_start_matches('/'), false);
        let mut child = self.derive(self.kind().clone(), strip_trailing_slash(path), None);
        child.set_user_path_opt(None);
        child
    }

    #[instrument(level = "debug", skip(self, attributes), fields(base = %self))]
    fn resolve(
        &self,
        user_path: &str,
        attributes: Option<&BTreeMap<String, String>>,
    ) -> PathwayResult<Path> {
        let windows = self.context().windows_paths;
        let mut resolved = match scan_scheme(user_path) {
            Some((scheme, rest)) if windows && is_drive_designator(&scheme, rest) => {
                match self.schemes().get("file") {
                    Some(file) => file.resolve_in_scheme(&format!("/{}", user_path), user_path, false)?,
                    None => self.not_found(&scheme, rest),
                }
            }
            Some((scheme, rest)) => match self.schemes().get(&scheme) {
                Some(prototype) => prototype.resolve_in_scheme(rest, user_path, true)?,
                None => {
                    debug!(scheme, "unknown scheme");
                    self.not_found(&scheme, rest)
                }
            },
            None => self.resolve_in_scheme(user_path, user_path, false)?,
        };
        resolved.schemes = self.schemes().clone();
        resolved.set_user_path_opt(Some(user_path.to_string()));
        if let Some(attributes) = attributes {
            resolved
                .attributes
                .extend(attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        debug!(url = %resolved, "resolved");
        Ok(resolved)
    }

    fn not_found(&self, scheme: &str, rest: &str) -> Path {
        let mut path = Path::prototype(
            PathKind::NotFound {
                scheme: scheme.to_string(),
            },
            self.context.clone(),
        );
        path.path = strip_trailing_slash(normalize("/", rest, false));
        path
    }

    /// Resolves `rest` inside this path's scheme. `from_prefix` is set when `rest` followed
    /// an explicit scheme prefix.
    fn resolve_in_scheme(
        &self,
        rest: &str,
        user_path: &str,
        from_prefix: bool,
    ) -> PathwayResult<Path> {
        match self.kind() {
            PathKind::Local | PathKind::Memory(_) | PathKind::NotFound { .. } => {
                let windows = self.context().windows_paths && matches!(self.kind(), PathKind::Local);
                let path = normalize(self.path(), rest, windows);
                Ok(self.derive(self.kind().clone(), strip_trailing_slash(path), None))
            }
            PathKind::Http(_) | PathKind::Https(_) => {
                self.resolve_http(rest, user_path, from_prefix)
            }
            PathKind::Tcp(_) => self.resolve_tcp(rest, user_path, from_prefix),
        }
    }

    /// `//` names a new authority only outside a sandbox or right after a scheme prefix.
    fn authority_part<'a>(&self, rest: &'a str, from_prefix: bool) -> Option<&'a str> {
        if self.root().is_empty() || from_prefix {
            rest.strip_prefix("//")
        } else {
            None
        }
    }

    fn resolve_http(&self, rest: &str, user_path: &str, from_prefix: bool) -> PathwayResult<Path> {
        let https = matches!(self.kind(), PathKind::Https(_));
        if let Some(after) = self.authority_part(rest, from_prefix) {
            let end = after.find(['/', '?']).unwrap_or(after.len());
            let default_port = if https { HTTPS_PORT } else { HTTP_PORT };
            let address = parse_authority(&after[..end], Some(default_port), user_path)?;
            let (path, query) = split_query(&after[end..]);
            let path = normalize("/", &unescape_url(path), false);
            let kind = if https {
                PathKind::Https(address)
            } else {
                PathKind::Http(address)
            };
            let mut resolved = self.derive(kind, path, query.map(str::to_string));
            resolved.attributes.clear();
            return Ok(resolved);
        }
        if from_prefix {
            return Err(Box::new(PathwayError::resolution(user_path, "bad scheme")));
        }
        let (path, query) = split_query(rest);
        let path = normalize(self.path(), &unescape_url(path), false);
        Ok(self.derive(self.kind().clone(), path, query.map(str::to_string)))
    }

    fn resolve_tcp(&self, rest: &str, user_path: &str, from_prefix: bool) -> PathwayResult<Path> {
        if let Some(after) = self.authority_part(rest, from_prefix) {
            let end = after.find('/').unwrap_or(after.len());
            let address = parse_authority(&after[..end], None, user_path)?;
            let path = strip_trailing_slash(normalize("/", &after[end..], false));
            let mut resolved = self.derive(PathKind::Tcp(address), path, None);
            resolved.attributes.clear();
            return Ok(resolved);
        }
        if from_prefix {
            return Err(Box::new(PathwayError::resolution(user_path, "bad scheme")));
        }
        let path = strip_trailing_slash(normalize(self.path(), rest, false));
        Ok(self.derive(self.kind().clone(), path, None))
    }
}
