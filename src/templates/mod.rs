//! Embedded text templates.
//!
//! Placeholders are `{{key}}` and are filled by [`render`].

/// Markdown injected into each sandbox at `/etc/corral/SANDBOX.md`.
pub(crate) const SANDBOX_DOCS: &str = include_str!("sandbox.md");

/// NixOS module handed to `nixos-container create --config-file`.
pub(crate) const CONTAINER_NIX: &str = include_str!("container.nix");

/// Replaces every `{{key}}` in `template` with its value.
pub(crate) fn render(template: &str, vars: &[(&str, String)]) -> String {
    vars.iter().fold(template.to_string(), |text, (key, value)| {
        text.replace(&format!("{{{{{key}}}}}"), value)
    })
}
