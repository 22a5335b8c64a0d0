//! Module enumeration
//!
//! Two sources produce the same [`LoadedModule`] stream:
//!
//! - [`LoadOrderModules`] follows the loader's intrusive list in raw memory,
//!   recovering each entry from its embedded link by field offset.
//! - [`ModuleArena`] keeps descriptors in a fixed-capacity arena linked by
//!   index, for tools and tests that never see a real loader block.
//!
//! Both stop when the walk returns to the head. A walk that runs past its
//! bound without doing so yields [`PatchError::MalformedModuleList`] once and
//! then ends.

use core::marker::PhantomData;
use core::ptr;

use arrayvec::{ArrayString, ArrayVec};
use errata_abi::{KldrDataTableEntry, ListEntry, LoaderParameterBlock, ModuleFlags};

use crate::config::MemoryWindow;
use crate::error::{PatchError, Result};

pub const MODULE_NAME_CAPACITY: usize = 64;

/// Image base name, truncated to the capacity
pub type ModuleName = ArrayString<MODULE_NAME_CAPACITY>;

/// Decode a UTF-16 name; unpaired surrogates become U+FFFD
pub fn decode_name(units: &[u16]) -> ModuleName {
    let mut name = ModuleName::new();
    for decoded in char::decode_utf16(units.iter().copied()) {
        if name.try_push(decoded.unwrap_or(char::REPLACEMENT_CHARACTER)).is_err() {
            break;
        }
    }
    name
}

/// What the loader says about one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    /// Position in load order, starting at 0
    pub index: usize,
    /// Address of the first image byte
    pub base: u64,
    /// Image size in bytes
    pub size: usize,
    pub flags: ModuleFlags,
    pub name: ModuleName,
}

impl ModuleDescriptor {
    pub fn new(index: usize, base: u64, size: usize, name: &str) -> Self {
        let mut truncated = ModuleName::new();
        for c in name.chars() {
            if truncated.try_push(c).is_err() {
                break;
            }
        }
        Self {
            index,
            base,
            size,
            flags: ModuleFlags::empty(),
            name: truncated,
        }
    }

    pub fn with_flags(mut self, flags: ModuleFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Check the image range before anything reads it
    pub fn validate(&self, window: Option<MemoryWindow>) -> Result<()> {
        let invalid = PatchError::InvalidModule {
            base: self.base,
            size: self.size,
        };
        if self.base == 0 || self.size == 0 {
            return Err(invalid);
        }
        let len = u64::try_from(self.size).map_err(|_| invalid)?;
        if self.base.checked_add(len).is_none() {
            return Err(invalid);
        }
        match window {
            Some(window) if !window.contains(self.base, len) => Err(invalid),
            _ => Ok(()),
        }
    }
}

/// A descriptor together with exclusive access to its image bytes
#[derive(Debug)]
pub struct LoadedModule<'a> {
    pub descriptor: ModuleDescriptor,
    pub image: &'a mut [u8],
}

/// Walks the load-order list of a loader parameter block
#[derive(Debug)]
pub struct LoadOrderModules<'a> {
    head: *const ListEntry,
    cursor: *const ListEntry,
    visited: usize,
    limit: usize,
    finished: bool,
    _images: PhantomData<&'a mut [u8]>,
}

impl<'a> LoadOrderModules<'a> {
    /// # Safety
    /// `block` must be null or point to a loader parameter block that stays
    /// valid for `'a`. Every entry reachable from its load-order list must be
    /// a valid [`KldrDataTableEntry`], and every image named by an entry must
    /// be writable, distinct from every other image and not otherwise
    /// accessed while the returned iterator or its modules are alive.
    pub unsafe fn new(block: *const LoaderParameterBlock, limit: usize) -> Self {
        let head = LoaderParameterBlock::load_order_head(block);
        let cursor = if block.is_null() {
            ptr::null()
        } else {
            unsafe { (*head).flink.cast_const() }
        };
        Self {
            head,
            cursor,
            visited: 0,
            limit,
            finished: false,
            _images: PhantomData,
        }
    }

    fn fail(&mut self) -> Option<Result<LoadedModule<'a>>> {
        self.finished = true;
        Some(Err(PatchError::MalformedModuleList {
            visited: self.visited,
        }))
    }
}

impl<'a> Iterator for LoadOrderModules<'a> {
    type Item = Result<LoadedModule<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.cursor == self.head {
            self.finished = true;
            return None;
        }
        if self.cursor.is_null() || self.visited >= self.limit {
            return self.fail();
        }

        let record = KldrDataTableEntry::from_load_order_link(self.cursor);
        // SAFETY: the contract of `new` covers every entry on the list
        let (descriptor, image, next) = unsafe {
            let entry = &*record;
            let descriptor = ModuleDescriptor {
                index: self.visited,
                base: entry.dll_base as u64,
                size: entry.size_of_image as usize,
                flags: ModuleFlags::from_raw(entry.flags),
                name: decode_name(entry.base_dll_name.units()),
            };
            let image: &'a mut [u8] = if entry.dll_base.is_null() || entry.size_of_image == 0 {
                Default::default()
            } else {
                core::slice::from_raw_parts_mut(entry.dll_base, entry.size_of_image as usize)
            };
            (descriptor, image, entry.in_load_order_links.flink.cast_const())
        };

        self.cursor = next;
        self.visited += 1;
        Some(Ok(LoadedModule { descriptor, image }))
    }
}

/// Arena link: either the list head or a node index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Head,
    Node(usize),
}

#[derive(Debug)]
struct ArenaNode<'a> {
    descriptor: ModuleDescriptor,
    image: &'a mut [u8],
    flink: Link,
    blink: Link,
}

/// Circular load-order list kept as an indexed arena
#[derive(Debug)]
pub struct ModuleArena<'a, const N: usize> {
    nodes: ArrayVec<ArenaNode<'a>, N>,
    head_flink: Link,
    head_blink: Link,
}

impl<'a, const N: usize> ModuleArena<'a, N> {
    pub fn new() -> Self {
        Self {
            nodes: ArrayVec::new(),
            head_flink: Link::Head,
            head_blink: Link::Head,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Append an image at the tail; `None` once the arena is full
    pub fn push(&mut self, name: &str, base: u64, image: &'a mut [u8]) -> Option<usize> {
        let index = self.nodes.len();
        let tail = self.head_blink;
        let node = ArenaNode {
            descriptor: ModuleDescriptor::new(index, base, image.len(), name),
            image,
            flink: Link::Head,
            blink: tail,
        };
        self.nodes.try_push(node).ok()?;
        match tail {
            Link::Head => self.head_flink = Link::Node(index),
            Link::Node(previous) => self.nodes[previous].flink = Link::Node(index),
        }
        self.head_blink = Link::Node(index);
        Some(index)
    }

    /// Descriptor of the node at `index`
    pub fn descriptor(&self, index: usize) -> Option<&ModuleDescriptor> {
        self.nodes.get(index).map(|node| &node.descriptor)
    }

    /// Last image in load order
    pub fn last(&self) -> Option<&ModuleDescriptor> {
        match self.head_blink {
            Link::Head => None,
            Link::Node(index) => self.descriptor(index),
        }
    }

    /// Back link of `link`
    pub fn previous(&self, link: Link) -> Option<Link> {
        match link {
            Link::Head => Some(self.head_blink),
            Link::Node(index) => self.nodes.get(index).map(|node| node.blink),
        }
    }

    /// Overwrite the forward link of `from`
    pub fn set_flink(&mut self, from: Link, to: Link) {
        match from {
            Link::Head => self.head_flink = to,
            Link::Node(index) => {
                if let Some(node) = self.nodes.get_mut(index) {
                    node.flink = to;
                }
            }
        }
    }

    /// Walk the list from the head, handing out each image once
    pub fn into_load_order(self) -> ArenaLoadOrder<'a, N> {
        let cursor = self.head_flink;
        ArenaLoadOrder {
            arena: self,
            cursor,
            seen: [false; N],
            visited: 0,
            finished: false,
        }
    }
}

impl<const N: usize> Default for ModuleArena<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Load-order walk over a [`ModuleArena`]
#[derive(Debug)]
pub struct ArenaLoadOrder<'a, const N: usize> {
    arena: ModuleArena<'a, N>,
    cursor: Link,
    /// Nodes already handed out
    seen: [bool; N],
    visited: usize,
    finished: bool,
}

impl<'a, const N: usize> Iterator for ArenaLoadOrder<'a, N> {
    type Item = Result<LoadedModule<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let index = match self.cursor {
            Link::Head => {
                self.finished = true;
                return None;
            }
            Link::Node(index) => index,
        };
        // a well-formed list visits each node exactly once
        if index >= self.arena.nodes.len() || self.seen[index] {
            self.finished = true;
            return Some(Err(PatchError::MalformedModuleList {
                visited: self.visited,
            }));
        }

        self.seen[index] = true;
        let node = &mut self.arena.nodes[index];
        let mut descriptor = node.descriptor.clone();
        descriptor.index = self.visited;
        let image = core::mem::take(&mut node.image);
        self.cursor = node.flink;
        self.visited += 1;
        Some(Ok(LoadedModule { descriptor, image }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_name() {
        let units: Vec<u16> = "ntoskrnl.exe".encode_utf16().collect();
        assert_eq!(decode_name(&units).as_str(), "ntoskrnl.exe");
        assert_eq!(decode_name(&[0x0068, 0xD800, 0x0069]).as_str(), "h\u{FFFD}i");
        let long: Vec<u16> = core::iter::repeat(u16::from(b'a')).take(100).collect();
        assert_eq!(decode_name(&long).len(), MODULE_NAME_CAPACITY);
    }

    #[test]
    fn test_descriptor_validation() {
        let module = ModuleDescriptor::new(0, 0x8000_0000, 0x1000, "hal.dll");
        assert!(module.validate(None).is_ok());
        assert!(module.validate(Some(MemoryWindow::new(0x8000_0000, 0x1000))).is_ok());
        assert_eq!(
            module.validate(Some(MemoryWindow::new(0x9000_0000, 0x1000))),
            Err(PatchError::InvalidModule {
                base: 0x8000_0000,
                size: 0x1000
            })
        );
        assert!(ModuleDescriptor::new(0, 0, 0x1000, "").validate(None).is_err());
        assert!(ModuleDescriptor::new(0, 0x1000, 0, "").validate(None).is_err());
        assert!(ModuleDescriptor::new(0, u64::MAX - 4, 0x10, "").validate(None).is_err());
    }

    #[test]
    fn test_empty_arena_yields_nothing() {
        let arena: ModuleArena<'_, 4> = ModuleArena::new();
        assert!(arena.is_empty());
        assert_eq!(arena.into_load_order().count(), 0);
    }

    #[test]
    fn test_arena_walks_in_push_order() {
        let mut a = [0u8; 16];
        let mut b = [1u8; 32];
        let mut arena: ModuleArena<'_, 4> = ModuleArena::new();
        assert_eq!(arena.push("a.sys", 0x1000, &mut a), Some(0));
        assert_eq!(arena.push("b.sys", 0x2000, &mut b), Some(1));
        assert_eq!(arena.last().map(|d| d.name.as_str()), Some("b.sys"));
        assert_eq!(arena.previous(Link::Node(1)), Some(Link::Node(0)));
        assert_eq!(arena.previous(Link::Head), Some(Link::Node(1)));

        let modules: Vec<_> = arena.into_load_order().map(|m| m.unwrap()).collect();
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].descriptor.name.as_str(), "a.sys");
        assert_eq!(modules[0].image.len(), 16);
        assert_eq!(modules[1].descriptor.index, 1);
        assert_eq!(modules[1].descriptor.base, 0x2000);
        assert_eq!(modules[1].image[0], 1);
    }

    #[test]
    fn test_arena_full() {
        let mut a = [0u8; 4];
        let mut b = [0u8; 4];
        let mut arena: ModuleArena<'_, 1> = ModuleArena::new();
        assert_eq!(arena.push("a", 0x1000, &mut a), Some(0));
        assert_eq!(arena.push("b", 0x2000, &mut b), None);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_arena_cycle_is_malformed() {
        let mut a = [0u8; 4];
        let mut b = [0u8; 4];
        let mut arena: ModuleArena<'_, 4> = ModuleArena::new();
        arena.push("a", 0x1000, &mut a);
        arena.push("b", 0x2000, &mut b);
        // b points back at a instead of the head
        arena.set_flink(Link::Node(1), Link::Node(0));

        let mut walk = arena.into_load_order();
        assert!(walk.next().unwrap().is_ok());
        assert!(walk.next().unwrap().is_ok());
        assert_eq!(
            walk.next().unwrap().unwrap_err(),
            PatchError::MalformedModuleList { visited: 2 }
        );
        assert!(walk.next().is_none());
    }

    #[test]
    fn test_arena_self_loop_is_malformed() {
        let mut a = [7u8; 8];
        let mut b = [0u8; 4];
        let mut arena: ModuleArena<'_, 4> = ModuleArena::new();
        arena.push("a", 0x1000, &mut a);
        arena.push("b", 0x2000, &mut b);
        // a points at itself, b is never reached
        arena.set_flink(Link::Node(0), Link::Node(0));

        let mut walk = arena.into_load_order();
        let first = walk.next().unwrap().unwrap();
        assert_eq!(first.descriptor.name.as_str(), "a");
        assert_eq!(first.image, &[7u8; 8]);
        assert_eq!(
            walk.next().unwrap().unwrap_err(),
            PatchError::MalformedModuleList { visited: 1 }
        );
        assert!(walk.next().is_none());
    }

    #[test]
    fn test_arena_flagged_descriptor() {
        let mut a = [0u8; 4];
        let mut arena: ModuleArena<'_, 2> = ModuleArena::new();
        arena.push("a", 0x1000, &mut a);
        let descriptor = arena
            .descriptor(0)
            .cloned()
            .unwrap()
            .with_flags(ModuleFlags::LOAD_IN_PROGRESS);
        assert!(descriptor.flags.is_partially_loaded());
        assert_eq!(descriptor.base, 0x1000);
    }

    #[test]
    fn test_arena_dangling_link_is_malformed() {
        let mut a = [0u8; 4];
        let mut arena: ModuleArena<'_, 4> = ModuleArena::new();
        arena.push("a", 0x1000, &mut a);
        arena.set_flink(Link::Node(0), Link::Node(3));

        let results: Vec<_> = arena.into_load_order().collect();
        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());
    }

    struct RawList {
        block: Box<LoaderParameterBlock>,
        entries: Vec<Box<KldrDataTableEntry>>,
        _names: Vec<Vec<u16>>,
    }

    /// Build a real circular list over heap-allocated entries
    fn raw_list(images: &mut [Vec<u8>], names: &[&str]) -> RawList {
        let mut block = Box::new(LoaderParameterBlock::empty());
        let head: *mut ListEntry = &mut block.load_order_list_head;
        let mut entries: Vec<Box<KldrDataTableEntry>> = Vec::new();
        let mut name_buffers: Vec<Vec<u16>> = Vec::new();

        for (image, name) in images.iter_mut().zip(names) {
            let mut units: Vec<u16> = name.encode_utf16().collect();
            let mut entry = Box::new(KldrDataTableEntry::zeroed());
            entry.dll_base = image.as_mut_ptr();
            entry.size_of_image = image.len() as u32;
            entry.flags = ModuleFlags::IMAGE_DLL.bits();
            entry.base_dll_name.length = (units.len() * 2) as u16;
            entry.base_dll_name.maximum_length = (units.len() * 2) as u16;
            entry.base_dll_name.buffer = units.as_mut_ptr();
            name_buffers.push(units);
            entries.push(entry);
        }

        let links: Vec<*mut ListEntry> = entries
            .iter_mut()
            .map(|entry| &mut entry.in_load_order_links as *mut ListEntry)
            .collect();
        unsafe {
            let mut previous = head;
            for &link in &links {
                (*previous).flink = link;
                (*link).blink = previous;
                previous = link;
            }
            (*previous).flink = head;
            (*head).blink = previous;
        }

        RawList {
            block,
            entries,
            _names: name_buffers,
        }
    }

    #[test]
    fn test_raw_list_walk() {
        let mut images = vec![vec![0u8; 64], vec![0u8; 128]];
        let list = raw_list(&mut images, &["ntoskrnl.exe", "hal.dll"]);
        let block: *const LoaderParameterBlock = &*list.block;

        let modules: Vec<_> = unsafe { LoadOrderModules::new(block, 16) }
            .map(|m| m.unwrap())
            .collect();
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].descriptor.name.as_str(), "ntoskrnl.exe");
        assert_eq!(modules[0].descriptor.size, 64);
        assert!(modules[0].descriptor.flags.contains(ModuleFlags::IMAGE_DLL));
        assert_eq!(modules[1].descriptor.index, 1);
        assert_eq!(modules[1].descriptor.name.as_str(), "hal.dll");
        assert_eq!(modules[1].image.len(), 128);
        drop(modules);
        drop(list);
    }

    #[test]
    fn test_raw_empty_list() {
        let mut block = Box::new(LoaderParameterBlock::empty());
        let head: *mut ListEntry = &mut block.load_order_list_head;
        block.load_order_list_head.flink = head;
        block.load_order_list_head.blink = head;

        let block: *const LoaderParameterBlock = &*block;
        assert_eq!(unsafe { LoadOrderModules::new(block, 16) }.count(), 0);
    }

    #[test]
    fn test_raw_null_block_is_malformed() {
        let mut walk = unsafe { LoadOrderModules::new(ptr::null(), 16) };
        assert_eq!(
            walk.next().unwrap().unwrap_err(),
            PatchError::MalformedModuleList { visited: 0 }
        );
        assert!(walk.next().is_none());
    }

    #[test]
    fn test_raw_list_limit() {
        let mut images = vec![vec![0u8; 16], vec![0u8; 16], vec![0u8; 16]];
        let list = raw_list(&mut images, &["a", "b", "c"]);
        let block: *const LoaderParameterBlock = &*list.block;

        let results: Vec<_> = unsafe { LoadOrderModules::new(block, 2) }.collect();
        assert_eq!(results.len(), 3);
        assert_eq!(
            results[2].as_ref().unwrap_err(),
            &PatchError::MalformedModuleList { visited: 2 }
        );
        drop(results);
        assert_eq!(list.entries.len(), 3);
    }

    #[test]
    fn test_raw_null_image_yields_empty_slice() {
        let mut images = vec![vec![0u8; 16]];
        let mut list = raw_list(&mut images, &["boot.sys"]);
        list.entries[0].dll_base = ptr::null_mut();
        let block: *const LoaderParameterBlock = &*list.block;

        let modules: Vec<_> = unsafe { LoadOrderModules::new(block, 4) }
            .map(|m| m.unwrap())
            .collect();
        assert_eq!(modules[0].descriptor.base, 0);
        assert!(modules[0].image.is_empty());
        assert!(modules[0].descriptor.validate(None).is_err());
    }
}
