//! Module settings page

use std::fmt::Write;

use crate::module::traits::{ModuleState, RuntimeStatus};
use crate::module::ModuleListing;

/// Escape text for HTML element content and quoted attributes
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

const STYLE: &str = r#"
body { font-family: sans-serif; margin: 2em; }
table { border-collapse: collapse; width: 100%; }
th, td { text-align: left; padding: 0.4em 0.8em; border-bottom: 1px solid #ddd; }
.error { color: #b00; }
.muted { color: #777; font-size: 0.9em; }
"#;

const SCRIPT: &str = r#"
document.querySelectorAll('input.module-toggle').forEach(function (toggle) {
  toggle.addEventListener('change', function () {
    var row = toggle.closest('tr');
    var errorCell = row.querySelector('.error');
    var wanted = toggle.checked;
    errorCell.textContent = '';
    toggle.disabled = true;
    fetch('/admin/action', {
      method: 'POST',
      credentials: 'same-origin',
      headers: { 'Content-Type': 'application/json' },
      body: JSON.stringify({
        action: 'toggle_module',
        module_id: toggle.dataset.module,
        status: wanted ? 'on' : 'off',
        nonce: document.body.dataset.nonce
      })
    }).then(function (res) {
      return res.json().catch(function () { return { success: false, error: 'HTTP ' + res.status }; });
    }).then(function (data) {
      if (!data.success) {
        toggle.checked = !wanted;
        errorCell.textContent = data.error || 'Request failed';
      }
    }).catch(function (err) {
      toggle.checked = !wanted;
      errorCell.textContent = String(err);
    }).finally(function () {
      toggle.disabled = false;
    });
  });
});
"#;

/// Render the settings page
///
/// `nonce` is the anti-forgery token for `toggle_module` issued to the
/// viewing user.
pub fn render_modules_page(listing: &ModuleListing, nonce: &str) -> String {
    let mut html = String::new();
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Modules</title>\n<style>{}</style>\n</head>\n\
         <body data-nonce=\"{}\">\n<h1>Modules</h1>\n",
        STYLE,
        escape_html(nonce)
    );

    if listing.modules.is_empty() {
        html.push_str("<p>No modules found.</p>\n");
    } else {
        html.push_str(
            "<table>\n<thead><tr><th>Enabled</th><th>Module</th><th>Version</th>\
             <th>Identifier</th><th>Status</th><th></th></tr></thead>\n<tbody>\n",
        );
        for status in &listing.modules {
            let d = &status.descriptor;
            let checked = if status.state == ModuleState::On {
                " checked"
            } else {
                ""
            };
            let runtime = match status.runtime {
                Some(RuntimeStatus::Running) => "running",
                Some(RuntimeStatus::Completed) => "loaded",
                None => "",
            };
            let _ = write!(
                html,
                "<tr>\
                 <td><input type=\"checkbox\" class=\"module-toggle\" data-module=\"{id}\"{checked}></td>\
                 <td><strong>{name}</strong><br><span class=\"muted\">{desc}</span></td>\
                 <td>{version}</td>\
                 <td><code>{id}</code></td>\
                 <td>{runtime}</td>\
                 <td class=\"error\"></td>\
                 </tr>\n",
                id = escape_html(&d.identifier),
                checked = checked,
                name = escape_html(&d.display_name),
                desc = escape_html(d.description.as_deref().unwrap_or("")),
                version = escape_html(d.version.as_deref().unwrap_or("")),
                runtime = runtime,
            );
        }
        html.push_str("</tbody>\n</table>\n");
    }

    if !listing.collisions.is_empty() {
        html.push_str("<h2>Ignored modules</h2>\n<ul>\n");
        for c in &listing.collisions {
            let _ = writeln!(
                html,
                "<li>{} (<code>{}</code>) shares identifier <code>{}</code> with <code>{}</code></li>",
                escape_html(&c.display_name),
                escape_html(&c.entry_point.display().to_string()),
                escape_html(&c.identifier),
                escape_html(&c.kept_entry_point.display().to_string()),
            );
        }
        html.push_str("</ul>\n");
    }

    let _ = write!(html, "<script>{}</script>\n</body>\n</html>\n", SCRIPT);
    html
}
