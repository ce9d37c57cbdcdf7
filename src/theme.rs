use anyhow::{anyhow, Context, Result};
use ratatui::style::Color;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "camdeck";

#[derive(Debug, Clone, Copy)]
pub struct ThemePalette {
    pub text: Color,
    pub muted: Color,
    pub border: Color,
    pub border_active: Color,
    pub accent: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
}

impl Default for ThemePalette {
    fn default() -> Self {
        Self {
            text: Color::Rgb(228, 231, 240),
            muted: Color::Rgb(138, 146, 164),
            border: Color::Rgb(82, 92, 116),
            border_active: Color::Rgb(122, 162, 247),
            accent: Color::Rgb(125, 207, 255),
            success: Color::Rgb(115, 218, 140),
            warning: Color::Rgb(245, 185, 95),
            error: Color::Rgb(247, 118, 128),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct ThemeFile {
    text: String,
    muted: String,
    border: String,
    border_active: String,
    accent: String,
    success: String,
    warning: String,
    error: String,
}

impl Default for ThemeFile {
    fn default() -> Self {
        Self {
            text: "#E4E7F0".to_owned(),
            muted: "#8A92A4".to_owned(),
            border: "#525C74".to_owned(),
            border_active: "#7AA2F7".to_owned(),
            accent: "#7DCFFF".to_owned(),
            success: "#73DA8C".to_owned(),
            warning: "#F5B95F".to_owned(),
            error: "#F77680".to_owned(),
        }
    }
}

impl ThemePalette {
    fn from_file(file: &ThemeFile) -> Result<Self> {
        Ok(Self {
            text: parse_hex_color("text", &file.text)?,
            muted: parse_hex_color("muted", &file.muted)?,
            border: parse_hex_color("border", &file.border)?,
            border_active: parse_hex_color("border_active", &file.border_active)?,
            accent: parse_hex_color("accent", &file.accent)?,
            success: parse_hex_color("success", &file.success)?,
            warning: parse_hex_color("warning", &file.warning)?,
            error: parse_hex_color("error", &file.error)?,
        })
    }
}

pub fn theme_path() -> Result<PathBuf> {
    let root = dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .context("unable to determine user data directory")?;
    Ok(root.join(APP_DIR).join("theme.json"))
}

pub fn load_or_create_theme() -> Result<ThemePalette> {
    let path = theme_path()?;

    if !path.exists() {
        let default_file = ThemeFile::default();
        write_theme_file(&path, &default_file)?;
        return ThemePalette::from_file(&default_file);
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed reading theme config at {}", path.display()))?;
    let parsed = serde_json::from_str::<ThemeFile>(&raw)
        .with_context(|| format!("failed parsing theme config at {}", path.display()))?;
    ThemePalette::from_file(&parsed)
}

fn write_theme_file(path: &Path, theme: &ThemeFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating theme directory {}", parent.display()))?;
    }
    let payload = serde_json::to_string_pretty(theme).context("failed serializing theme config")?;
    fs::write(path, payload)
        .with_context(|| format!("failed writing theme config at {}", path.display()))?;
    Ok(())
}

fn parse_hex_color(key: &str, value: &str) -> Result<Color> {
    let input = value.trim();
    let hex = input.strip_prefix('#').unwrap_or(input);
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(anyhow!(
            "theme field '{key}' must be a hex color like #RRGGBB, got '{value}'"
        ));
    }

    let red = u8::from_str_radix(&hex[0..2], 16)
        .with_context(|| format!("theme field '{key}' has invalid red component"))?;
    let green = u8::from_str_radix(&hex[2..4], 16)
        .with_context(|| format!("theme field '{key}' has invalid green component"))?;
    let blue = u8::from_str_radix(&hex[4..6], 16)
        .with_context(|| format!("theme field '{key}' has invalid blue component"))?;

    Ok(Color::Rgb(red, green, blue))
}

#[cfg(test)]
mod tests {
    use super::parse_hex_color;
    use ratatui::style::Color;

    #[test]
    fn hex_colors_parse_with_and_without_hash() {
        assert_eq!(
            parse_hex_color("text", "#7AA2F7").unwrap(),
            Color::Rgb(0x7A, 0xA2, 0xF7)
        );
        assert_eq!(
            parse_hex_color("text", "7aa2f7").unwrap(),
            Color::Rgb(0x7A, 0xA2, 0xF7)
        );
    }

    #[test]
    fn malformed_hex_colors_are_rejected() {
        assert!(parse_hex_color("text", "#12345").is_err());
        assert!(parse_hex_color("text", "not-a-color").is_err());
    }
}
