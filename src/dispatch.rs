//! Per-request pipeline: route the port to a document root, resolve the
//! URL to a filesystem path, apply rewrite rules, then serve a script
//! result, a directory (index or listing) or a static file. Every failure
//! along the way degrades to a bodyless 404.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use log::debug;
use percent_encoding::percent_decode_str;

use crate::handlers::cgi;
use crate::http::response::Response;
use crate::listing;
use crate::mime;
use crate::options::ServerOptions;
use crate::rewrite;
use crate::router::PortRouter;

/// Stylesheet every served page may link without the site providing one.
/// Served from an embedded resource whether or not it exists on disk.
pub const STYLE_ASSET: &str = "GomiTestServerStyle.css";

const STYLE_ASSET_BODY: &str = include_str!("../assets/GomiTestServerStyle.css");

#[derive(Clone)]
pub struct Dispatcher {
    router: PortRouter,
    options: Arc<ServerOptions>,
}

impl Dispatcher {
    pub fn new(router: PortRouter, options: Arc<ServerOptions>) -> Self {
        Self { router, options }
    }

    /// Maps one request to a response. `url` is the request path without
    /// any query string, starting with `/`.
    pub fn handle(&self, port: u16, url: &str) -> Response {
        let root = match self.router.get_mapping(port) {
            Some(r) => r,
            None => return Response::not_found(),
        };

        match self.resolve(&root, url) {
            Ok(response) => response,
            Err(e) => {
                debug!("[Dispatch] {} on :{} -> 404 ({})", url, port, e);
                Response::not_found()
            }
        }
    }

    fn resolve(&self, root: &Path, url: &str) -> io::Result<Response> {
        let url_rel = url.strip_prefix('/').unwrap_or(url);
        let decoded = percent_decode_str(url_rel).decode_utf8_lossy();
        let mut file_name = root.join(decoded.as_ref());

        // 1: the reserved stylesheet pretends to exist in every root.
        if file_name == root.join(STYLE_ASSET) {
            return Ok(Response::ok(
                mime::content_type(STYLE_ASSET),
                STYLE_ASSET_BODY.as_bytes().to_vec(),
            ));
        }

        // 2: apply rewrite rules, if a rewrite file is present.
        file_name = rewrite::apply(root, url, file_name);

        // Hardened versus the original: a resolved path that escapes the
        // document root is refused.
        if escapes_root(root, &file_name) {
            return Ok(Response::not_found());
        }

        // 3: run the script interpreter?
        if let Some(interpreter) = &self.options.interpreter {
            if extension_of(&file_name).as_deref()
                == Some(self.options.script_extension.as_str())
            {
                let output = cgi::execute(interpreter, root, &file_name, url)?;
                return Ok(Response::ok(
                    mime::content_type(".html"),
                    output.stdout.into_bytes(),
                ));
            }
        }

        // 4: an existing directory serves its index file or a listing.
        if file_name.is_dir() {
            let index = file_name.join(&self.options.index_file);
            if index.is_file() {
                let content = fs::read(&index)?;
                let ct = mime::content_type(&index.to_string_lossy());
                return Ok(Response::ok(ct, content));
            }

            let page = listing::render(root, &file_name)?;
            return Ok(Response::ok(mime::content_type(".html"), page.into_bytes()));
        }

        // 5: plain static file.
        let content = fs::read(&file_name)?;
        let ct = mime::content_type(&file_name.to_string_lossy());
        Ok(Response::ok(ct, content))
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

/// True when `path` exists and canonicalizes outside the document root.
/// Nonexistent targets pass; they fail with NotFound downstream anyway.
fn escapes_root(root: &Path, path: &Path) -> bool {
    let canonical = match path.canonicalize() {
        Ok(p) => p,
        Err(_) => return false,
    };
    match root.canonicalize() {
        Ok(canonical_root) => !canonical.starts_with(&canonical_root),
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn dispatcher_for(router: &PortRouter, options: ServerOptions) -> Dispatcher {
        Dispatcher::new(router.clone(), Arc::new(options))
    }

    fn no_scripts() -> ServerOptions {
        ServerOptions {
            interpreter: None,
            ..ServerOptions::default()
        }
    }

    #[test]
    fn unmapped_port_is_404() {
        let router = PortRouter::new();
        let d = dispatcher_for(&router, no_scripts());
        let resp = d.handle(8080, "/index.html");
        assert_eq!(resp.status, 404);
        assert!(resp.body.is_empty());
    }

    #[test]
    fn static_file_bytes_and_content_type() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("data.json"), b"{\"k\":1}").unwrap();

        let router = PortRouter::new();
        router.set_mapping(8080, root.path());
        let d = dispatcher_for(&router, no_scripts());

        let resp = d.handle(8080, "/data.json");
        assert_eq!(resp.status, 200);
        assert_eq!(resp.content_type.as_deref(), Some("application/json"));
        assert_eq!(resp.body, b"{\"k\":1}");
    }

    #[test]
    fn url_is_percent_decoded_before_resolution() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("my file.txt"), b"x").unwrap();

        let router = PortRouter::new();
        router.set_mapping(8080, root.path());
        let d = dispatcher_for(&router, no_scripts());

        assert_eq!(d.handle(8080, "/my%20file.txt").status, 200);
    }

    #[test]
    fn missing_file_is_404() {
        let root = TempDir::new().unwrap();
        let router = PortRouter::new();
        router.set_mapping(8080, root.path());
        let d = dispatcher_for(&router, no_scripts());

        assert_eq!(d.handle(8080, "/nope.html").status, 404);
    }

    #[test]
    fn virtual_stylesheet_served_without_a_backing_file() {
        let root = TempDir::new().unwrap();
        let router = PortRouter::new();
        router.set_mapping(8080, root.path());
        let d = dispatcher_for(&router, no_scripts());

        let resp = d.handle(8080, &format!("/{}", STYLE_ASSET));
        assert_eq!(resp.status, 200);
        assert_eq!(resp.content_type.as_deref(), Some("text/css"));
        assert!(!resp.body.is_empty());
    }

    #[test]
    fn directory_with_index_serves_the_index() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("sub")).unwrap();
        fs::write(root.path().join("sub/index.html"), b"<p>idx</p>").unwrap();

        let router = PortRouter::new();
        router.set_mapping(8080, root.path());
        let d = dispatcher_for(&router, no_scripts());

        let resp = d.handle(8080, "/sub");
        assert_eq!(resp.status, 200);
        assert_eq!(resp.content_type.as_deref(), Some("text/html"));
        assert_eq!(resp.body, b"<p>idx</p>");
    }

    #[test]
    fn directory_without_index_gets_a_listing() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("a.png"), b"").unwrap();

        let router = PortRouter::new();
        router.set_mapping(8080, root.path());
        let d = dispatcher_for(&router, no_scripts());

        let resp = d.handle(8080, "/");
        assert_eq!(resp.status, 200);
        assert_eq!(resp.content_type.as_deref(), Some("text/html"));
        let page = String::from_utf8(resp.body).unwrap();
        assert!(page.contains("a.png"));
        assert!(page.contains("ico_img"));
    }

    #[test]
    fn rewrite_file_redirects_missing_urls() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("real.html"), b"real").unwrap();
        fs::write(root.path().join("fallback.html"), b"fb").unwrap();
        fs::write(
            root.path().join(rewrite::REWRITE_FILENAME),
            "RewriteEngine on\n\
             RewriteCond %{REQUEST_FILENAME} !-f\n\
             RewriteRule ^(.*)$ /fallback.html\n",
        )
        .unwrap();

        let router = PortRouter::new();
        router.set_mapping(8080, root.path());
        let d = dispatcher_for(&router, no_scripts());

        assert_eq!(d.handle(8080, "/real.html").body, b"real");
        assert_eq!(d.handle(8080, "/does-not-exist").body, b"fb");
    }

    #[test]
    fn script_extension_runs_the_interpreter() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("hello.sh"), "#!/bin/sh\necho hello from cgi\n").unwrap();

        let router = PortRouter::new();
        router.set_mapping(8080, root.path());
        let options = ServerOptions {
            script_extension: "sh".to_string(),
            interpreter: Some(PathBuf::from("/bin/sh")),
            ..ServerOptions::default()
        };
        let d = dispatcher_for(&router, options);

        let resp = d.handle(8080, "/hello.sh");
        assert_eq!(resp.status, 200);
        assert_eq!(resp.content_type.as_deref(), Some("text/html"));
        assert_eq!(resp.body, b"hello from cgi\n");
    }

    #[test]
    fn script_without_interpreter_is_served_as_a_static_file() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("page.php"), b"<?php ?>").unwrap();

        let router = PortRouter::new();
        router.set_mapping(8080, root.path());
        let d = dispatcher_for(&router, no_scripts());

        let resp = d.handle(8080, "/page.php");
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"<?php ?>");
    }

    #[test]
    fn traversal_outside_the_root_is_refused() {
        let outer = TempDir::new().unwrap();
        let root = outer.path().join("root");
        fs::create_dir(&root).unwrap();
        fs::write(outer.path().join("secret.txt"), b"top secret").unwrap();

        let router = PortRouter::new();
        router.set_mapping(8080, &root);
        let d = dispatcher_for(&router, no_scripts());

        assert_eq!(d.handle(8080, "/../secret.txt").status, 404);
        assert_eq!(d.handle(8080, "/%2e%2e/secret.txt").status, 404);
    }
}
