//! Loader parameter block and loader data table entries
//!
//! Layouts mirror what the OS loader builds in memory on 64-bit ARM. The
//! parameter block is much larger than what is declared here; only the
//! prefix up to the last list head the patcher can reach is described, and
//! it is only ever accessed through a pointer handed over by the loader.

use core::mem::offset_of;
use core::ptr;

use static_assertions::{assert_eq_size, const_assert_eq};

/// Intrusive doubly linked list link
#[derive(Debug)]
#[repr(C)]
pub struct ListEntry {
    pub flink: *mut ListEntry,
    pub blink: *mut ListEntry,
}

impl ListEntry {
    /// Unlinked entry with both links null
    pub const fn unlinked() -> Self {
        Self {
            flink: ptr::null_mut(),
            blink: ptr::null_mut(),
        }
    }
}

/// Counted UTF-16 string; `length` and `maximum_length` are in bytes
#[derive(Debug)]
#[repr(C)]
pub struct UnicodeString {
    pub length: u16,
    pub maximum_length: u16,
    pub buffer: *mut u16,
}

impl UnicodeString {
    pub const fn empty() -> Self {
        Self {
            length: 0,
            maximum_length: 0,
            buffer: ptr::null_mut(),
        }
    }

    /// Borrow the code units of the string
    ///
    /// # Safety
    /// `buffer` must be null or point to at least `length` readable bytes
    /// that stay valid for the returned lifetime.
    pub unsafe fn units(&self) -> &[u16] {
        if self.buffer.is_null() || self.length < 2 {
            return &[];
        }
        unsafe { core::slice::from_raw_parts(self.buffer, usize::from(self.length) / 2) }
    }
}

/// One loaded boot image, linked into `LoaderParameterBlock::load_order_list_head`
#[derive(Debug)]
#[repr(C)]
pub struct KldrDataTableEntry {
    pub in_load_order_links: ListEntry,
    pub exception_table: *mut u8,
    pub exception_table_size: u32,
    pub gp_value: *mut u8,
    pub non_paged_debug_info: *mut u8,
    pub dll_base: *mut u8,
    pub entry_point: *mut u8,
    pub size_of_image: u32,
    pub full_dll_name: UnicodeString,
    pub base_dll_name: UnicodeString,
    pub flags: u32,
    pub load_count: u16,
    pub signature_info: u16,
    pub section_pointer: *mut u8,
    pub check_sum: u32,
    pub coverage_section_size: u32,
    pub coverage_section: *mut u8,
    pub loaded_imports: *mut u8,
    pub spare: *mut u8,
    pub size_of_image_not_rounded: u32,
    pub time_date_stamp: u32,
}

impl KldrDataTableEntry {
    /// Offset of the load-order link inside the entry
    pub const LOAD_ORDER_LINKS_OFFSET: usize = offset_of!(KldrDataTableEntry, in_load_order_links);

    /// Entry with every pointer null and every count zero
    pub const fn zeroed() -> Self {
        Self {
            in_load_order_links: ListEntry::unlinked(),
            exception_table: ptr::null_mut(),
            exception_table_size: 0,
            gp_value: ptr::null_mut(),
            non_paged_debug_info: ptr::null_mut(),
            dll_base: ptr::null_mut(),
            entry_point: ptr::null_mut(),
            size_of_image: 0,
            full_dll_name: UnicodeString::empty(),
            base_dll_name: UnicodeString::empty(),
            flags: 0,
            load_count: 0,
            signature_info: 0,
            section_pointer: ptr::null_mut(),
            check_sum: 0,
            coverage_section_size: 0,
            coverage_section: ptr::null_mut(),
            loaded_imports: ptr::null_mut(),
            spare: ptr::null_mut(),
            size_of_image_not_rounded: 0,
            time_date_stamp: 0,
        }
    }

    /// Recover the entry that embeds `link` as its load-order link
    ///
    /// This only computes an address; nothing is dereferenced.
    pub fn from_load_order_link(link: *const ListEntry) -> *const KldrDataTableEntry {
        link.wrapping_byte_sub(Self::LOAD_ORDER_LINKS_OFFSET).cast()
    }
}

/// Leading part of the loader parameter block
#[derive(Debug)]
#[repr(C)]
pub struct LoaderParameterBlock {
    pub os_major_version: u32,
    pub os_minor_version: u32,
    pub size: u32,
    pub os_loader_security_version: u32,
    pub load_order_list_head: ListEntry,
    pub memory_descriptor_list_head: ListEntry,
    pub boot_driver_list_head: ListEntry,
    pub early_launch_list_head: ListEntry,
    pub core_driver_list_head: ListEntry,
    pub core_extensions_driver_list_head: ListEntry,
    pub tpm_core_driver_list_head: ListEntry,
}

impl LoaderParameterBlock {
    pub const fn empty() -> Self {
        Self {
            os_major_version: 0,
            os_minor_version: 0,
            size: 0,
            os_loader_security_version: 0,
            load_order_list_head: ListEntry::unlinked(),
            memory_descriptor_list_head: ListEntry::unlinked(),
            boot_driver_list_head: ListEntry::unlinked(),
            early_launch_list_head: ListEntry::unlinked(),
            core_driver_list_head: ListEntry::unlinked(),
            core_extensions_driver_list_head: ListEntry::unlinked(),
            tpm_core_driver_list_head: ListEntry::unlinked(),
        }
    }

    /// Address of the load-order list head inside the block at `block`
    pub fn load_order_head(block: *const LoaderParameterBlock) -> *const ListEntry {
        block
            .wrapping_byte_add(offset_of!(LoaderParameterBlock, load_order_list_head))
            .cast()
    }
}

// Offsets as laid out by the loader on 64-bit ARM
#[cfg(target_pointer_width = "64")]
mod layout {
    use super::*;

    assert_eq_size!(ListEntry, [u64; 2]);
    assert_eq_size!(UnicodeString, [u64; 2]);

    const_assert_eq!(KldrDataTableEntry::LOAD_ORDER_LINKS_OFFSET, 0x00);
    const_assert_eq!(offset_of!(KldrDataTableEntry, exception_table_size), 0x18);
    const_assert_eq!(offset_of!(KldrDataTableEntry, dll_base), 0x30);
    const_assert_eq!(offset_of!(KldrDataTableEntry, entry_point), 0x38);
    const_assert_eq!(offset_of!(KldrDataTableEntry, size_of_image), 0x40);
    const_assert_eq!(offset_of!(KldrDataTableEntry, full_dll_name), 0x48);
    const_assert_eq!(offset_of!(KldrDataTableEntry, base_dll_name), 0x58);
    const_assert_eq!(offset_of!(KldrDataTableEntry, flags), 0x68);
    const_assert_eq!(offset_of!(KldrDataTableEntry, section_pointer), 0x70);
    const_assert_eq!(offset_of!(KldrDataTableEntry, time_date_stamp), 0x9C);
    assert_eq_size!(KldrDataTableEntry, [u8; 0xA0]);

    const_assert_eq!(offset_of!(LoaderParameterBlock, load_order_list_head), 0x10);
    const_assert_eq!(offset_of!(LoaderParameterBlock, tpm_core_driver_list_head), 0x70);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_recovery() {
        let entry = KldrDataTableEntry::zeroed();
        let link: *const ListEntry = &entry.in_load_order_links;
        let recovered = KldrDataTableEntry::from_load_order_link(link);
        assert_eq!(recovered, &entry as *const KldrDataTableEntry);
    }

    #[test]
    fn test_load_order_head_address() {
        let block = LoaderParameterBlock::empty();
        let head = LoaderParameterBlock::load_order_head(&block);
        assert_eq!(head, &block.load_order_list_head as *const ListEntry);
    }

    #[test]
    fn test_unicode_units() {
        let mut name = [b'h' as u16, b'a' as u16, b'l' as u16];
        let string = UnicodeString {
            length: 6,
            maximum_length: 6,
            buffer: name.as_mut_ptr(),
        };
        assert_eq!(unsafe { string.units() }, &name);
        let empty = UnicodeString::empty();
        assert!(unsafe { empty.units() }.is_empty());
    }
}
