//! The host boundary (`spec.md` §6.1): everything the [`crate::loader::Loader`]
//! needs from its embedding process but cannot reasonably implement itself —
//! virtual memory, the PEB, already-loaded images, the API-Set namespace, and
//! process termination.
//!
//! `spec.md` explicitly abstracts PEB/TEB discovery and the API-Set schema
//! away from the loader's own logic (§6.1: "the loader never parses
//! `ntdll`'s internal structures directly"); this module is the seam where a
//! real embedding process would plug in `NtCurrentTeb()`-based discovery and
//! a `GetProcAddress(ntdll, "ApiSetQueryApiSetPresence")`-style lookup,
//! in place of the in-memory test doubles defined here.

use crate::error::Error;
use bitflags::bitflags;
use std::cell::RefCell;
use std::rc::Rc;

bitflags! {
    /// Mirrors `MEM_COMMIT`/`MEM_RESERVE` from `VirtualAlloc`.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct AllocationFlags: u32 {
        const RESERVE = 0x1;
        const COMMIT = 0x2;
    }
}

/// Mirrors the subset of `PAGE_*` constants the loader needs
/// (`examples/original_source/Packer/Win32Loader.cpp`'s `adjustPageProtection`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PageProtection {
    ReadOnly,
    ReadWrite,
    ExecuteRead,
    ExecuteReadWrite,
}

/// A module the host process already has mapped, as seen from `loadLibrary`'s
/// "already loaded" fast path.
#[derive(Clone, Debug)]
pub struct LoadedModule {
    pub file_name: String,
    pub file_path: String,
    pub base_address: u64,
}

/// One entry of the host's API-Set namespace: a virtual name (e.g.
/// `"ms-win-core-heap-l1-1-0"`, already stripped of the `api-`/`ext-` prefix
/// and `.dll` suffix) and the real DLLs it may resolve to.
///
/// `spec.md` §9 flags the original comparator as ambiguous when one name is
/// a byte-wise prefix of another; this crate's redirector
/// ([`crate::apiset::resolve`]) requires `entries` sorted by `(name.len(),
/// name)` so its strict length-then-bytes comparator is a valid binary
/// search key, resolving that ambiguity by construction.
#[derive(Clone, Debug)]
pub struct ApiSetEntry {
    pub name: String,
    pub hosts: Vec<String>,
}

/// The host's API-Set namespace, as handed to the redirector.
#[derive(Clone, Debug, Default)]
pub struct ApiSetNamespace {
    /// Must be sorted by `(name.len(), name)` — see [`ApiSetEntry`].
    pub entries: Vec<ApiSetEntry>,
}

/// A read/write view onto the process environment block fields the loader
/// touches (`spec.md` §4.5.1: "the primary image's base address is written
/// into `PEB.ImageBaseAddress`").
pub trait PebView {
    fn image_base_address(&self) -> u64;
    fn set_image_base_address(&mut self, value: u64);
}

/// The two shapes a mapped image's entry point can be invoked with
/// (`examples/original_source/Packer/Win32Loader.cpp`'s `executeEntryPoint`).
#[derive(Copy, Clone, Debug)]
pub enum EntryPointCall {
    /// `DllMain(hinstDLL, fdwReason, lpvReserved)`.
    Dll {
        base_address: u64,
        reason: u32,
        reserved: u64,
    },
    /// A zero-argument `EXE` entry point.
    Exe,
}

/// Everything the [`crate::loader::Loader`] needs from its host.
pub trait HostServices {
    /// Reserve/commit `size` bytes, optionally at `preferred_base`. Returns
    /// the actual base address, which may differ from `preferred_base` if it
    /// was unavailable (`spec.md` §4.5.1).
    fn allocate_virtual(
        &self,
        preferred_base: u64,
        size: u64,
        flags: AllocationFlags,
    ) -> Result<u64, Error>;

    /// Change the protection of `[address, address + size)`.
    fn protect_virtual(&self, address: u64, size: u64, protection: PageProtection) -> Result<(), Error>;

    /// Read-only access to the PEB.
    fn peb(&self) -> &dyn PebView;

    /// Mutable access to the PEB.
    fn peb_mut(&mut self) -> &mut dyn PebView;

    /// Modules the host process already has mapped, used by `loadLibrary`'s
    /// already-loaded fast path (`spec.md` §4.5.3 step 2).
    fn loaded_images(&self) -> &[LoadedModule];

    /// The host's API-Set namespace.
    fn api_set(&self) -> &ApiSetNamespace;

    /// `PATH`-equivalent search directories, consumed by [`crate::resolver`].
    fn environment(&self) -> Vec<(String, String)>;

    /// Copy `data` into the mapping at `address` (`spec.md` §4.5.1 "map the
    /// header, then each section, at its preferred RVA").
    fn write_bytes(&self, address: u64, data: &[u8]) -> Result<(), Error>;

    /// Read a little-endian `u32` out of the mapping at `address` (used to
    /// read/write relocation targets and the security cookie on Win32).
    fn read_u32(&self, address: u64) -> Result<u32, Error>;

    /// Write a little-endian `u32` into the mapping at `address`.
    fn write_u32(&self, address: u64, value: u32) -> Result<(), Error>;

    /// Read a little-endian `u64` out of the mapping at `address` (used for
    /// Win32-AMD64 relocation targets and the security cookie).
    fn read_u64(&self, address: u64) -> Result<u64, Error>;

    /// Write a little-endian `u64` into the mapping at `address`.
    fn write_u64(&self, address: u64, value: u64) -> Result<(), Error>;

    /// Transfer control to `address`, the one genuinely unsafe operation in
    /// this trait: a real host implementation casts `address` to a function
    /// pointer of the right ABI and calls through it. `FakeHost` never calls
    /// real code; it just records the call for test assertions.
    fn call_entry_point(&self, address: u64, call: EntryPointCall) -> Result<i32, Error>;

    /// Equivalent of `ExitProcess`/`RtlExitUserProcess`; never returns.
    fn terminate(&self, exit_code: i32) -> !;
}

/// A minimal in-memory [`HostServices`] implementation for tests: allocation
/// is backed by a growable buffer, protection calls are recorded but not
/// enforced, and `terminate` panics instead of exiting the test process.
pub struct FakeHost {
    memory: RefCell<Vec<u8>>,
    next_base: RefCell<u64>,
    peb_image_base: u64,
    loaded: Vec<LoadedModule>,
    api_set: ApiSetNamespace,
    protections: RefCell<Vec<(u64, u64, PageProtection)>>,
    entry_point_calls: RefCell<Vec<(u64, EntryPointCall)>>,
}

impl PebView for FakeHost {
    fn image_base_address(&self) -> u64 {
        self.peb_image_base
    }

    fn set_image_base_address(&mut self, value: u64) {
        self.peb_image_base = value;
    }
}

impl FakeHost {
    pub fn new(base: u64, arena_size: u64) -> Self {
        FakeHost {
            memory: RefCell::new(vec![0u8; arena_size as usize]),
            next_base: RefCell::new(base),
            peb_image_base: 0,
            loaded: Vec::new(),
            api_set: ApiSetNamespace::default(),
            protections: RefCell::new(Vec::new()),
            entry_point_calls: RefCell::new(Vec::new()),
        }
    }

    pub fn with_loaded_images(mut self, loaded: Vec<LoadedModule>) -> Self {
        self.loaded = loaded;
        self
    }

    pub fn with_api_set(mut self, api_set: ApiSetNamespace) -> Self {
        self.api_set = api_set;
        self
    }

    /// Direct write access for test setup (copying section data into the
    /// fake arena, etc.).
    pub fn memory_mut(&self) -> std::cell::RefMut<'_, Vec<u8>> {
        self.memory.borrow_mut()
    }

    pub fn recorded_protections(&self) -> Vec<(u64, u64, PageProtection)> {
        self.protections.borrow().clone()
    }

    pub fn recorded_entry_point_calls(&self) -> Vec<(u64, EntryPointCall)> {
        self.entry_point_calls.borrow().clone()
    }

    fn index_for(&self, address: u64, len: usize) -> Result<(usize, usize), Error> {
        let start = address as usize;
        let end = start
            .checked_add(len)
            .ok_or(Error::OffsetOutOfRange { offset: start, len })?;
        if end > self.memory.borrow().len() {
            return Err(Error::OffsetOutOfRange { offset: start, len });
        }
        Ok((start, end))
    }
}

impl HostServices for FakeHost {
    fn allocate_virtual(
        &self,
        _preferred_base: u64,
        size: u64,
        _flags: AllocationFlags,
    ) -> Result<u64, Error> {
        // Always hands out `next_base` and bumps it, ignoring the preferred
        // address entirely. This is deliberately stricter than a real
        // `VirtualAlloc` (which honors a free preferred address): it forces
        // every test through the loader's relocation-delta math instead of
        // letting it go untested whenever the preferred base happens to be
        // free.
        let mut next = self.next_base.borrow_mut();
        let base = *next;
        *next = base + size;
        let mut memory = self.memory.borrow_mut();
        let needed = (base.saturating_sub(0) + size) as usize;
        if memory.len() < needed {
            memory.resize(needed, 0);
        }
        Ok(base)
    }

    fn protect_virtual(&self, address: u64, size: u64, protection: PageProtection) -> Result<(), Error> {
        self.protections.borrow_mut().push((address, size, protection));
        Ok(())
    }

    fn peb(&self) -> &dyn PebView {
        self
    }

    fn peb_mut(&mut self) -> &mut dyn PebView {
        self
    }

    fn loaded_images(&self) -> &[LoadedModule] {
        &self.loaded
    }

    fn api_set(&self) -> &ApiSetNamespace {
        &self.api_set
    }

    fn environment(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn write_bytes(&self, address: u64, data: &[u8]) -> Result<(), Error> {
        let (start, end) = self.index_for(address, data.len())?;
        self.memory.borrow_mut()[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_u32(&self, address: u64) -> Result<u32, Error> {
        let (start, end) = self.index_for(address, 4)?;
        Ok(u32::from_le_bytes(self.memory.borrow()[start..end].try_into().unwrap()))
    }

    fn write_u32(&self, address: u64, value: u32) -> Result<(), Error> {
        self.write_bytes(address, &value.to_le_bytes())
    }

    fn read_u64(&self, address: u64) -> Result<u64, Error> {
        let (start, end) = self.index_for(address, 8)?;
        Ok(u64::from_le_bytes(self.memory.borrow()[start..end].try_into().unwrap()))
    }

    fn write_u64(&self, address: u64, value: u64) -> Result<(), Error> {
        self.write_bytes(address, &value.to_le_bytes())
    }

    fn call_entry_point(&self, address: u64, call: EntryPointCall) -> Result<i32, Error> {
        self.entry_point_calls.borrow_mut().push((address, call));
        Ok(0)
    }

    fn terminate(&self, exit_code: i32) -> ! {
        panic!("FakeHost::terminate({exit_code})")
    }
}

/// Shared-ownership handle used by test scaffolding that needs to mutate a
/// [`FakeHost`] through an `Rc` (the loader itself only ever borrows a host
/// by `&mut dyn HostServices`/`&dyn HostServices`).
pub type SharedFakeHost = Rc<RefCell<FakeHost>>;
