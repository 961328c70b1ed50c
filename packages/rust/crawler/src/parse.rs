//! HTML extraction for Warpower category pages.
//!
//! Each `div.mainCol` block on a category page describes one unit. Fields are
//! read from fixed span classes; anything missing falls back to a placeholder
//! so a partially-rendered block still yields a record.

use armory_shared::{ArmoryError, MilitaryUnit, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

const UNKNOWN: &str = "Unknown";
const NO_DESCRIPTION: &str = "No description available";

/// Pre-compiled selectors and patterns for one extractor instance.
pub(crate) struct UnitSelectors {
    container: Selector,
    service: Selector,
    image: Selector,
    assessment: Selector,
    flag: Selector,
    units: Selector,
    name: Selector,
    model: Selector,
    role: Selector,
    description: Selector,
    flag_country: Regex,
    parenthesized: Regex,
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| ArmoryError::parse(format!("invalid selector '{css}': {e}")))
}

fn pattern(re: &str) -> Result<Regex> {
    Regex::new(re).map_err(|e| ArmoryError::parse(format!("invalid pattern '{re}': {e}")))
}

impl UnitSelectors {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self {
            container: selector("div.mainCol")?,
            service: selector("span.textWhite.textNormal.textBold")?,
            image: selector("img.entryImg")?,
            assessment: selector("div.assessmentBox span.textNormal.textWhite")?,
            flag: selector("img.flagMinStyling")?,
            units: selector("span.textJumbo")?,
            name: selector("span.textYellowOrange")?,
            model: selector("span.textWhite.textLarge.textBold")?,
            role: selector("span.textNormal.textLtstGray")?,
            description: selector("span.textSmall1.textWhite")?,
            flag_country: pattern(r"/flags/([^./]+)\.(?:jpg|png|webp)")?,
            parenthesized: pattern(r"\((.*?)\)")?,
        })
    }

    /// Extract every unit block from `html`. Relative image URLs are
    /// resolved against `base`.
    pub(crate) fn parse_units(&self, html: &str, base: &Url) -> Vec<MilitaryUnit> {
        let doc = Html::parse_document(html);
        doc.select(&self.container)
            .map(|block| self.parse_block(block, base))
            .collect()
    }

    fn parse_block(&self, block: ElementRef<'_>, base: &Url) -> MilitaryUnit {
        let flag_url = self.attr_url(block, &self.flag, base);
        let country = flag_url
            .as_deref()
            .and_then(|url| self.flag_country.captures(url))
            .and_then(|caps| caps.get(1))
            .map(|m| capitalize(m.as_str()))
            .unwrap_or_else(|| UNKNOWN.into());

        let model = self
            .text(block, &self.model)
            .and_then(|full| {
                self.parenthesized
                    .captures(&full)
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().trim().to_string())
            })
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| UNKNOWN.into());

        let role = self
            .text(block, &self.role)
            .map(|r| r.replace("Role:", "").trim().to_string())
            .unwrap_or_else(|| UNKNOWN.into());

        MilitaryUnit {
            service: self.text_or(block, &self.service, UNKNOWN),
            name: self.text_or(block, &self.name, UNKNOWN),
            model,
            country,
            units: self
                .text(block, &self.units)
                .map_or(0, |raw| parse_count(&raw)),
            role,
            assessment: self.text_or(block, &self.assessment, UNKNOWN),
            description: self.text_or(block, &self.description, NO_DESCRIPTION),
            image_url: self.attr_url(block, &self.image, base),
            flag_url,
            sketchfab_embed_url: None,
        }
    }

    fn text(&self, block: ElementRef<'_>, sel: &Selector) -> Option<String> {
        block
            .select(sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
    }

    fn text_or(&self, block: ElementRef<'_>, sel: &Selector, fallback: &str) -> String {
        self.text(block, sel)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| fallback.to_string())
    }

    fn attr_url(&self, block: ElementRef<'_>, sel: &Selector, base: &Url) -> Option<String> {
        let src = block.select(sel).next()?.value().attr("src")?;
        base.join(src.trim()).ok().map(|u| u.to_string())
    }
}

/// `"1,250"` -> 1250. Unparseable counts become 0.
fn parse_count(raw: &str) -> i64 {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

/// `"russia"` -> `"Russia"`.
fn capitalize(s: &str) -> String {
    let lower = s.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
        <div class="mainCol">
            <span class="textWhite textNormal textBold">Indian Air Force</span>
            <img class="entryImg" src="/imgs/su30.jpg">
            <div class="assessmentBox"><span class="textNormal textWhite">Frontline Fighter</span></div>
            <img class="flagMinStyling" src="imgs/flags/russia.png">
            <span class="textJumbo">1,260</span>
            <span class="textYellowOrange">Sukhoi Su-30MKI</span>
            <span class="textWhite textLarge textBold">Flanker-H (Su-30MKI)</span>
            <span class="textNormal textLtstGray">Role: Multirole</span>
            <span class="textSmall1 textWhite">Twin-engine air superiority fighter.</span>
        </div>
        <div class="mainCol">
            <span class="textYellowOrange">Mystery Jet</span>
        </div>
        <div class="sideCol"><span class="textYellowOrange">Not a unit</span></div>
    </body></html>"#;

    fn base() -> Url {
        Url::parse("https://www.warpowerindia.com/").unwrap()
    }

    #[test]
    fn parses_full_block() {
        let selectors = UnitSelectors::new().unwrap();
        let units = selectors.parse_units(PAGE, &base());
        assert_eq!(units.len(), 2);

        let su30 = &units[0];
        assert_eq!(su30.service, "Indian Air Force");
        assert_eq!(su30.name, "Sukhoi Su-30MKI");
        assert_eq!(su30.model, "Su-30MKI");
        assert_eq!(su30.country, "Russia");
        assert_eq!(su30.units, 1260);
        assert_eq!(su30.role, "Multirole");
        assert_eq!(su30.assessment, "Frontline Fighter");
        assert_eq!(su30.description, "Twin-engine air superiority fighter.");
        assert_eq!(
            su30.image_url.as_deref(),
            Some("https://www.warpowerindia.com/imgs/su30.jpg")
        );
        assert_eq!(
            su30.flag_url.as_deref(),
            Some("https://www.warpowerindia.com/imgs/flags/russia.png")
        );
        assert!(su30.sketchfab_embed_url.is_none());
    }

    #[test]
    fn sparse_block_uses_placeholders() {
        let selectors = UnitSelectors::new().unwrap();
        let units = selectors.parse_units(PAGE, &base());
        let sparse = &units[1];
        assert_eq!(sparse.name, "Mystery Jet");
        assert_eq!(sparse.service, "Unknown");
        assert_eq!(sparse.model, "Unknown");
        assert_eq!(sparse.country, "Unknown");
        assert_eq!(sparse.units, 0);
        assert_eq!(sparse.description, "No description available");
        assert!(sparse.image_url.is_none());
    }

    #[test]
    fn page_without_blocks_yields_nothing() {
        let selectors = UnitSelectors::new().unwrap();
        assert!(selectors
            .parse_units("<html><body><p>Maintenance</p></body></html>", &base())
            .is_empty());
    }

    #[test]
    fn count_parsing() {
        assert_eq!(parse_count(" 42 "), 42);
        assert_eq!(parse_count("1,250"), 1250);
        assert_eq!(parse_count("n/a"), 0);
    }
}
