//! Page and payload fixtures served by the fake source

/// Login form as served to anonymous visitors and expired sessions
pub const LOGIN_PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>Sign in</title></head><body>
    <form action="/login" method="post">
        <input type="hidden" name="csrf" value="t0k3n">
        <input name="username">
        <input type="password" name="password">
        <button type="submit">Sign in</button>
    </form>
</body></html>"#;

/// Minimal well-formed single-page PDF
pub const EDITION_PDF: &[u8] = b"%PDF-1.4\n\
1 0 obj<< /Type /Catalog /Pages 2 0 R >>endobj\n\
2 0 obj<< /Type /Pages /Kids [3 0 R] /Count 1 >>endobj\n\
3 0 obj<< /Type /Page /Parent 2 0 R >>endobj\n\
trailer<< /Root 1 0 R >>\n\
%%EOF\n";

/// Rendered front page of an HTML edition
pub const FRONT_PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>The Daily Example</title></head><body>
    <a href="/logout">Log out</a>
    <main>
        <article><h1>Harbour reopens after storm</h1><p>Ferries resume at dawn.</p></article>
    </main>
</body></html>"#;

/// Authenticated home page linking to `href` with `label`
pub fn home_page(href: &str, label: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html><body>
    <nav><a href="/account">My account</a> <a href="/logout">Log out</a></nav>
    <p>Welcome back, reader</p>
    <a href="/archive">Back issues</a>
    <a href="{href}">{label}</a>
</body></html>"#
    )
}
