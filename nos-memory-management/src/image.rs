//! Program images
//!
//! The loader that parses executables lives outside this crate; the pager
//! only needs the section layout and a way to fetch one page of a section
//! on demand.

use nos_api::{Error, Result};

#[cfg(any(test, feature = "mock"))]
use mockall::automock;

use crate::physical::{PAGE_SIZE, Page, pages_spanned};

/// A loadable section of a program image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Section name, for diagnostics
    pub name: String,
    /// First virtual page covered by the section
    pub first_vpn: usize,
    /// Number of pages covered
    pub num_pages: usize,
    /// Whether the section's pages may not be written
    pub read_only: bool,
}

impl Section {
    /// Returns true if `vpn` falls inside this section.
    pub fn contains(&self, vpn: usize) -> bool {
        vpn >= self.first_vpn && vpn - self.first_vpn < self.num_pages
    }
}

/// Source of section contents for demand loading
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait ProgramImage: Send + Sync {
    /// Sections in ascending virtual page order
    fn sections(&self) -> Vec<Section>;

    /// Fill `page` with page `page_index` of section `section`.
    fn load_page(&self, section: usize, page_index: usize, page: &mut Page) -> Result<()>;
}

/// A program image held in memory
///
/// Sections are laid out back to back from vpn 0 unless placed explicitly.
#[derive(Debug, Default, Clone)]
pub struct MemoryImage {
    sections: Vec<(Section, Vec<u8>)>,
}

impl MemoryImage {
    /// Create an image with no sections
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a section holding `data` after the last section.
    pub fn with_section(self, name: &str, data: impl Into<Vec<u8>>, read_only: bool) -> Self {
        let first_vpn = self
            .sections
            .last()
            .map_or(0, |(s, _)| s.first_vpn + s.num_pages);
        self.with_section_at(name, first_vpn, data, read_only)
    }

    /// Add a section holding `data` starting at `first_vpn`.
    pub fn with_section_at(
        mut self,
        name: &str,
        first_vpn: usize,
        data: impl Into<Vec<u8>>,
        read_only: bool,
    ) -> Self {
        let data = data.into();
        let section = Section {
            name: name.to_string(),
            first_vpn,
            num_pages: pages_spanned(data.len()).max(1),
            read_only,
        };
        self.sections.push((section, data));
        self
    }
}

impl ProgramImage for MemoryImage {
    fn sections(&self) -> Vec<Section> {
        self.sections.iter().map(|(s, _)| s.clone()).collect()
    }

    fn load_page(&self, section: usize, page_index: usize, page: &mut Page) -> Result<()> {
        let (_, data) = self
            .sections
            .get(section)
            .filter(|(s, _)| page_index < s.num_pages)
            .ok_or_else(|| Error::SectionUnreadable {
                section,
                page: page_index,
            })?;
        let start = (page_index * PAGE_SIZE).min(data.len());
        let end = (start + PAGE_SIZE).min(data.len());
        let len = end - start;
        page[..len].copy_from_slice(&data[start..end]);
        page[len..].fill(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_are_laid_out_back_to_back() {
        let image = MemoryImage::new()
            .with_section(".text", vec![1u8; PAGE_SIZE + 1], true)
            .with_section(".data", vec![2u8; 10], false);
        let sections = image.sections();
        assert_eq!(sections[0].first_vpn, 0);
        assert_eq!(sections[0].num_pages, 2);
        assert_eq!(sections[1].first_vpn, 2);
        assert!(sections[1].contains(2));
        assert!(!sections[1].contains(3));
    }

    #[test]
    fn test_load_page_zero_pads_the_tail() {
        let image = MemoryImage::new().with_section(".data", vec![7u8; PAGE_SIZE + 3], false);
        let mut page = [0xFFu8; PAGE_SIZE];
        image.load_page(0, 1, &mut page).unwrap();
        assert_eq!(&page[..3], &[7, 7, 7]);
        assert!(page[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_load_page_outside_section_fails() {
        let image = MemoryImage::new().with_section(".data", vec![7u8; 4], false);
        let mut page = [0u8; PAGE_SIZE];
        assert!(matches!(
            image.load_page(0, 1, &mut page),
            Err(Error::SectionUnreadable { section: 0, page: 1 })
        ));
        assert!(image.load_page(3, 0, &mut page).is_err());
    }
}
