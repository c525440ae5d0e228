use caddyfile_rs::{Caddyfile, Directive, Matcher, SiteBlock, format};

use crate::caddy::Caddy;

/// Render a complete Caddyfile from the Caddy config for a single site
/// address. Used for the placeholder/pre-TLS server block the Application
/// phase starts with.
#[must_use]
pub fn render(caddy: &Caddy, domain: &str) -> String {
    render_multi(caddy, std::slice::from_ref(&domain.to_string()))
}

/// Render a Caddyfile whose site address lists every domain in `domains`
/// (Caddy's `a.example.com, b.example.com { ... }` syntax), so one
/// multi-SAN certificate backs every name behind a single server block.
/// Called by the certificate pipeline once `caddy.tls_cert` is set —
/// before that it's also used for the placeholder HTTP-only block.
#[must_use]
pub fn render_multi(caddy: &Caddy, domains: &[String]) -> String {
    let address = domains.join(", ");
    let mut site = SiteBlock::new(&address);

    if let Some((cert, key)) = &caddy.tls_cert {
        site = site.directive(Directive::new("tls").arg(cert).arg(key));
    }

    if let Some((user, hash)) = &caddy.basic_auth {
        site = site.basic_auth(user, hash);
    }

    // Routes take precedence over single reverse_proxy
    if !caddy.routes.is_empty() {
        site = add_route_handles(site, &caddy.routes);
    } else if let Some(upstream) = &caddy.reverse_proxy {
        site = site.reverse_proxy(&upstream.to_string());
    }

    if caddy.gzip {
        site = site.encode_gzip();
    }

    if caddy.security_headers {
        site = site.security_headers();
    }

    if caddy.hsts {
        site = site.directive(
            Directive::new("header")
                .arg("Strict-Transport-Security")
                .arg("\"max-age=31536000\""),
        );
    }

    for d in &caddy.extra_directives {
        site = site.directive(Directive::new(d));
    }

    let caddyfile = Caddyfile::new().site(site);
    format(&caddyfile)
}

/// Build `handle` directives for path-based routing.
///
/// Routes with a path pattern get `handle <path> { ... }`.
/// A route with an empty path becomes a bare `handle { ... }`
/// (catch-all).
fn add_route_handles(mut site: SiteBlock, routes: &[(String, String)]) -> SiteBlock {
    for (path, upstream) in routes {
        let inner = vec![Directive::new("reverse_proxy").arg(&upstream.to_string())];
        let mut handle = Directive::new("handle");
        if !path.is_empty() {
            handle = handle.matcher(Matcher::Path(path.clone()));
        }
        handle = handle.block(inner);
        site = site.directive(handle);
    }
    site
}
