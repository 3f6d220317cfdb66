//! The Loader (`spec.md` §4.5 / component C6): map an [`Image`], resolve its
//! imports, fix up relocations, and run it.
//!
//! Grounded on `examples/original_source/Packer/Win32Loader.cpp` in full:
//! `mapImage`, `processImports`, `adjustPageProtection`, `executeEntryPoint`,
//! `executeEntryPointQueue`, `loadImage`, `execute`, `loadLibrary` and
//! `getFunctionAddress`, plus the six `*Proxy` functions substituted into a
//! loaded module's IAT in place of the real `kernel32`/`kernelbase`/`ntdll`
//! entry points.
//!
//! A `Loader` is explicitly not `Sync`: `spec.md` §5 describes it as a
//! single-threaded, cooperative component (there is exactly one loader per
//! packed process, and its proxy functions reenter it synchronously, never
//! concurrently).

use crate::apiset;
use crate::config::LoaderConfig;
use crate::error::Error;
use crate::host::{AllocationFlags, EntryPointCall, HostServices, PageProtection};
use crate::image::{Architecture, Image, SectionFlags};
use crate::resolver;
use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::rc::Rc;

/// Literal `+= 10` bump applied to a mapped image's security cookie
/// (`examples/original_source/Packer/Win32Loader.cpp` line 85/87). The
/// original never explains the constant; it is carried over unchanged since
/// `spec.md` treats it as observable behavior, not an implementation detail.
pub const SECURITY_COOKIE_NONDEFAULT_BUMP: u64 = 10;

const DLL_PROCESS_ATTACH: u32 = 1;

fn lower(s: &str) -> String {
    s.to_ascii_lowercase()
}

/// Maps, links and runs [`Image`]s against a [`HostServices`] implementation.
///
/// Marker field makes the type explicitly `!Sync` (it is already `!Send`
/// transitively via `Rc`, but `Rc` alone does not forbid `Sync`); this
/// documents the single-threaded contract rather than relying on an
/// incidental consequence of using `Rc`.
pub struct Loader {
    primary: Rc<Image>,
    loaded_images: HashMap<u64, Rc<Image>>,
    loaded_libraries: HashMap<String, u64>,
    imports: Vec<Rc<Image>>,
    entry_point_queue: VecDeque<u64>,
    config: LoaderConfig,
    _not_sync: PhantomData<Cell<()>>,
}

thread_local! {
    static ACTIVE: Cell<Option<(*mut Loader, *mut dyn HostServices)>> = Cell::new(None);
}

/// RAII guard installing `loader`/`host` as the target of the proxy
/// functions for the duration of a top-level `execute()` call, mirroring the
/// original's `loaderInstance_` global (`examples/original_source/Packer/Win32Loader.cpp`
/// line 15, set once in the constructor and never cleared — here scoped
/// instead, since a Rust process may run and discard more than one `Loader`).
struct ActiveGuard {
    previous: Option<(*mut Loader, *mut dyn HostServices)>,
}

impl ActiveGuard {
    fn install(loader: &mut Loader, host: &mut dyn HostServices) -> Self {
        let previous = ACTIVE.with(|cell| cell.replace(Some((loader as *mut Loader, host as *mut dyn HostServices))));
        ActiveGuard { previous }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        ACTIVE.with(|cell| cell.set(self.previous));
    }
}

/// Run `f` with the currently-active loader/host pair.
///
/// # Panics
/// Panics if called outside of an `execute()` call (a proxy function can
/// only ever be reached from code a `Loader` itself mapped and ran).
fn with_active<R>(f: impl FnOnce(&mut Loader, &mut dyn HostServices) -> R) -> R {
    let pair = ACTIVE.with(|cell| cell.get());
    let (loader_ptr, host_ptr) = pair.expect("loader proxy invoked with no active Loader");
    // SAFETY: `ActiveGuard` only installs pointers to a `Loader`/`HostServices`
    // that are alive (borrowed mutably) for the entire body of `execute()`,
    // and clears them again before that borrow ends. A proxy can only run
    // synchronously underneath that same call (this loader never hands
    // control to another thread), so the pointers are still valid here.
    let loader = unsafe { &mut *loader_ptr };
    let host = unsafe { &mut *host_ptr };
    f(loader, host)
}

impl Loader {
    /// Build a loader for `primary`, with `imports` as a pre-resolved pool of
    /// images to prefer over a fresh [`resolver::load_import`] search
    /// (`examples/original_source/Packer/Win32Loader.cpp`'s constructor takes
    /// the same `imports` list).
    pub fn new(primary: Rc<Image>, imports: Vec<Rc<Image>>) -> Self {
        Loader {
            primary,
            loaded_images: HashMap::new(),
            loaded_libraries: HashMap::new(),
            imports,
            entry_point_queue: VecDeque::new(),
            config: LoaderConfig::default(),
            _not_sync: PhantomData,
        }
    }

    /// Override the default [`LoaderConfig`] (fallback base address, extra
    /// import search directories).
    pub fn with_config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Map `image.header` then each of its sections into a fresh allocation,
    /// apply base relocations, and record it as loaded
    /// (`examples/original_source/Packer/Win32Loader.cpp`'s `mapImage`).
    fn map_image(&mut self, host: &mut dyn HostServices, image: &Rc<Image>) -> Result<u64, Error> {
        let preferred_base = preferred_base(&self.config, image);
        let base = host.allocate_virtual(
            preferred_base,
            image.info.size,
            AllocationFlags::RESERVE | AllocationFlags::COMMIT,
        )?;

        host.write_bytes(base, &image.header)?;
        for section in &image.sections {
            host.write_bytes(base + section.base_address, &section.data)?;
        }

        let delta = base as i64 - image.info.base_address as i64;
        for &reloc_rva in &image.relocations {
            let address = base + reloc_rva;
            match image.info.architecture {
                Architecture::Win32 => {
                    let value = host.read_u32(address)?;
                    host.write_u32(address, (value as i64 + delta) as u32)?;
                }
                Architecture::Win32AMD64 => {
                    let value = host.read_u64(address)?;
                    host.write_u64(address, (value as i64 + delta) as u64)?;
                }
            }
        }

        self.loaded_libraries.insert(lower(&image.file_name), base);
        self.loaded_images.insert(base, Rc::clone(image));
        Ok(base)
    }

    /// Resolve every import of `image` and patch its IAT
    /// (`examples/original_source/Packer/Win32Loader.cpp`'s `processImports`).
    fn process_imports(&mut self, host: &mut dyn HostServices, base: u64, image: &Rc<Image>) -> Result<(), Error> {
        for import in &image.imports {
            let library_base = self.load_library(host, &import.library_name)?;
            for function in &import.functions {
                let address = self.get_function_address(host, library_base, &function.name, function.ordinal)?;
                let iat = base + function.iat_rva;
                match image.info.architecture {
                    Architecture::Win32 => host.write_u32(iat, address as u32)?,
                    Architecture::Win32AMD64 => host.write_u64(iat, address)?,
                }
            }
        }
        Ok(())
    }

    /// Apply final page protection per section
    /// (`examples/original_source/Packer/Win32Loader.cpp`'s `adjustPageProtection`:
    /// an if-cascade, not independent bit-ORing — Execute+Write wins over
    /// Execute alone, and Write wins over Read alone).
    fn adjust_page_protection(&self, host: &mut dyn HostServices, base: u64, image: &Rc<Image>) -> Result<(), Error> {
        for section in &image.sections {
            let mut protection = None;
            if section.flags.contains(SectionFlags::READ) {
                protection = Some(PageProtection::ReadOnly);
            }
            if section.flags.contains(SectionFlags::WRITE) {
                protection = Some(PageProtection::ReadWrite);
            }
            if section.flags.contains(SectionFlags::EXECUTE) {
                protection = Some(if section.flags.contains(SectionFlags::WRITE) {
                    PageProtection::ExecuteReadWrite
                } else {
                    PageProtection::ExecuteRead
                });
            }
            if let Some(protection) = protection {
                host.protect_virtual(base + section.base_address, section.virtual_size, protection)?;
            }
        }
        Ok(())
    }

    /// Bump the security cookie, then invoke the entry point
    /// (`examples/original_source/Packer/Win32Loader.cpp`'s `executeEntryPoint`).
    fn execute_entry_point(&self, host: &mut dyn HostServices, base: u64, image: &Rc<Image>) -> Result<(), Error> {
        if image.info.security_cookie_va != 0 {
            let delta = base as i64 - image.info.base_address as i64;
            let address = (image.info.security_cookie_va as i64 + delta) as u64;
            match image.info.architecture {
                Architecture::Win32 => {
                    let value = host.read_u32(address)?;
                    host.write_u32(address, value.wrapping_add(SECURITY_COOKIE_NONDEFAULT_BUMP as u32))?;
                }
                Architecture::Win32AMD64 => {
                    let value = host.read_u64(address)?;
                    host.write_u64(address, value.wrapping_add(SECURITY_COOKIE_NONDEFAULT_BUMP))?;
                }
            }
        }

        if image.info.entry_point != 0 {
            let address = base + image.info.entry_point;
            let call = if image.info.is_library() {
                EntryPointCall::Dll {
                    base_address: base,
                    reason: DLL_PROCESS_ATTACH,
                    reserved: 1,
                }
            } else {
                EntryPointCall::Exe
            };
            host.call_entry_point(address, call)?;
        }
        Ok(())
    }

    /// Drain the queue of mapped-but-not-yet-entered images, FIFO, removing
    /// each before invoking it (`examples/original_source/Packer/Win32Loader.cpp`'s
    /// `executeEntryPointQueue`: entries queued by a reentrant load during
    /// one iteration are still picked up by this same loop).
    fn execute_entry_point_queue(&mut self, host: &mut dyn HostServices) -> Result<(), Error> {
        while let Some(base) = self.entry_point_queue.pop_front() {
            let image = self
                .loaded_images
                .get(&base)
                .cloned()
                .ok_or_else(|| Error::HostFailure(format!("no loaded image at {base:#x}")))?;
            self.execute_entry_point(host, base, &image)?;
        }
        Ok(())
    }

    /// Map, link and queue `image` for entry (used for every import, as
    /// opposed to the primary image which `execute` runs immediately)
    /// (`examples/original_source/Packer/Win32Loader.cpp`'s `loadImage`).
    fn load_image(&mut self, host: &mut dyn HostServices, image: &Rc<Image>) -> Result<u64, Error> {
        let base = self.map_image(host, image)?;
        self.process_imports(host, base, image)?;
        self.adjust_page_protection(host, base, image)?;
        self.entry_point_queue.push_back(base);
        Ok(base)
    }

    /// Map and run the primary image (`examples/original_source/Packer/Win32Loader.cpp`'s
    /// `execute`): map, publish the base address into the PEB, resolve
    /// imports, protect, drain any entry points queued by those imports, then
    /// finally run the primary image's own entry point.
    pub fn execute(&mut self, host: &mut dyn HostServices) -> Result<(), Error> {
        let _guard = ActiveGuard::install(self, host);

        let primary = Rc::clone(&self.primary);
        let base = self.map_image(host, &primary)?;
        host.peb_mut().set_image_base_address(base);
        self.process_imports(host, base, &primary)?;
        self.adjust_page_protection(host, base, &primary)?;

        self.execute_entry_point_queue(host)?;
        self.execute_entry_point(host, base, &primary)?;
        Ok(())
    }

    /// Run each of `images` in turn as the primary image of its own fresh
    /// `Loader` (sharing this loader's `config`), collecting a result per
    /// image rather than stopping at the first failure. Ambient addition
    /// (`spec.md` §4.5.7, `SPEC_FULL.md` §4.5.7): the original only ever
    /// drives one primary image per process, but a host embedding several
    /// independently-packed images (e.g. a batch unpacker) wants to keep
    /// going after one fails rather than abort the run. Each image is fully
    /// mapped, linked, protected and entered, exactly as a call to
    /// `execute()` would do for it alone.
    pub fn execute_many(&mut self, host: &mut dyn HostServices, images: &[Rc<Image>]) -> Vec<Result<(), Error>> {
        images
            .iter()
            .map(|image| {
                let mut loader = Loader::new(Rc::clone(image), Vec::new()).with_config(self.config.clone());
                loader.execute(host)
            })
            .collect()
    }

    /// Resolve `filename` to a mapped base address, following the same
    /// precedence chain as `examples/original_source/Packer/Win32Loader.cpp`'s
    /// `loadLibrary`: already-loaded-by-this-loader cache, host-reported
    /// already-loaded images, API-Set redirection, the pre-resolved `imports`
    /// pool, then a fresh resolver search.
    fn load_library(&mut self, host: &mut dyn HostServices, filename: &str) -> Result<u64, Error> {
        if let Some(&base) = self.loaded_libraries.get(&lower(filename)) {
            return Ok(base);
        }

        if let Some(module) = host.loaded_images().iter().find(|m| m.file_name.eq_ignore_ascii_case(filename)).cloned() {
            // Re-parse the host's own mapping so its exports are available,
            // matching the original re-running the parser with
            // `fromMemory = true` over the live image.
            let source: Rc<dyn crate::datasource::DataSource> =
                Rc::new(HostMemorySource::new(module.base_address, module.file_name.clone()));
            let image = crate::parser::parse_from_memory(source, &module.file_name, &module.file_path)?;
            let image = Rc::new(image);
            self.imports.push(Rc::clone(&image));
            self.loaded_libraries.insert(lower(filename), module.base_address);
            self.loaded_images.insert(module.base_address, image);
            return Ok(module.base_address);
        }

        if let Some(host_dll) = apiset::resolve(host.api_set(), filename) {
            let base = self.load_library(host, &host_dll)?;
            self.loaded_libraries.insert(lower(filename), base);
            return Ok(base);
        }

        if let Some(image) = self.imports.iter().find(|i| i.file_name.eq_ignore_ascii_case(filename)).cloned() {
            return self.load_image(host, &image);
        }

        // Extra configured search directories are tried before the primary
        // image's own folder (`spec.md` §4.3: hint directories precede PATH,
        // and `LoaderConfig::import_search_hints` lets an embedder add more
        // of them ahead of that default).
        let hints = import_search_hints(&self.config, &self.primary.file_path);
        let mut last_err = None;
        for hint in &hints {
            match resolver::load_import(filename, Some(hint)) {
                Ok(image) => {
                    self.imports.push(Rc::clone(&image));
                    return self.load_image(host, &image);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::ImportNotFound(filename.to_string())))
    }

    /// Resolve `function_name` (or `ordinal` if `function_name` is empty)
    /// within the image mapped at `library_base`
    /// (`examples/original_source/Packer/Win32Loader.cpp`'s
    /// `getFunctionAddress`).
    ///
    /// Deviation from the original (`spec.md` §9): a forwarder string like
    /// `"api-ms-win-core-heap-l1-1-0.HeapAlloc"` contains a dot in its own
    /// module name, so splitting at the *first* `.` (what the original does)
    /// cuts the module name short. This splits at the *last* `.` instead.
    fn get_function_address(
        &mut self,
        host: &mut dyn HostServices,
        library_base: u64,
        function_name: &str,
        ordinal: u16,
    ) -> Result<u64, Error> {
        let image = match self.loaded_images.get(&library_base).cloned() {
            Some(image) => image,
            None => return Ok(0),
        };

        if let Some(proxy) = system_proxy(&image.file_name, function_name) {
            return Ok(proxy);
        }

        let export = if !function_name.is_empty() {
            image.find_export_by_name(function_name)
        } else {
            None
        };
        let export = export.or_else(|| image.find_export_by_ordinal(ordinal)).cloned();

        let Some(export) = export else {
            return Ok(0);
        };

        if export.is_forwarder() {
            let (dll_name, forward_function) = split_forwarder(&export.forward);
            let forward_ordinal = forward_function
                .strip_prefix('#')
                .and_then(|n| n.parse::<u16>().ok())
                .unwrap_or(0);
            let forward_name = if forward_ordinal != 0 { "" } else { forward_function };
            let target_base = self.load_library(host, &format!("{dll_name}.dll"))?;
            return self.get_function_address(host, target_base, forward_name, forward_ordinal);
        }

        Ok(export.address + library_base)
    }
}

/// Preferred base address to request for `image`: its own `ImageBase` when
/// it has one, otherwise `config.fallback_base_address`
/// (`LoaderConfig::fallback_base_address`'s one consumer).
fn preferred_base(config: &LoaderConfig, image: &Image) -> u64 {
    if image.info.base_address != 0 {
        image.info.base_address
    } else {
        config.fallback_base_address
    }
}

/// Directories to search for an unresolved import, in precedence order:
/// `config.import_search_hints` ahead of the primary image's own folder
/// (`LoaderConfig::import_search_hints`'s one consumer).
fn import_search_hints(config: &LoaderConfig, primary_file_path: &str) -> Vec<String> {
    let mut hints = config.import_search_hints.clone();
    hints.push(primary_file_path.to_string());
    hints
}

/// Split a forward string at its *last* dot, separating the module name from
/// the function (or `#ordinal`) it forwards to.
fn split_forwarder(forward: &str) -> (&str, &str) {
    match forward.rfind('.') {
        Some(at) => (&forward[..at], &forward[at + 1..]),
        None => (forward, ""),
    }
}

/// Maps well-known `kernel32.dll`/`kernelbase.dll`/`ntdll.dll` export names
/// to this loader's own proxy functions
/// (`examples/original_source/Packer/Win32Loader.cpp`'s `getFunctionAddress`,
/// the `if(image->fileName.icompare("kernel32.dll") == 0 ...)` block).
fn system_proxy(library_file_name: &str, function_name: &str) -> Option<u64> {
    let lib = library_file_name.to_ascii_lowercase();
    if lib == "kernel32.dll" || lib == "kernelbase.dll" {
        let address: usize = match function_name {
            "LoadLibraryExW" => load_library_ex_w_proxy as usize,
            "LoadLibraryExA" => load_library_ex_a_proxy as usize,
            "LoadLibraryW" => load_library_w_proxy as usize,
            "LoadLibraryA" => load_library_a_proxy as usize,
            "GetModuleHandleExW" => get_module_handle_ex_w_proxy as usize,
            "GetModuleHandleExA" => get_module_handle_ex_a_proxy as usize,
            "GetModuleHandleW" => get_module_handle_w_proxy as usize,
            "GetModuleHandleA" => get_module_handle_a_proxy as usize,
            "GetProcAddress" => get_proc_address_proxy as usize,
            _ => return None,
        };
        return Some(address as u64);
    }
    if lib == "ntdll.dll" && function_name == "LdrAddRefDll" {
        return Some(ldr_add_ref_dll_proxy as usize as u64);
    }
    None
}

/// A [`crate::datasource::DataSource`] over an already-mapped host module,
/// used to re-parse its exports with `from_memory = true`.
struct HostMemorySource {
    base_address: u64,
    file_name: String,
}

impl HostMemorySource {
    fn new(base_address: u64, file_name: String) -> Self {
        HostMemorySource { base_address, file_name }
    }
}

impl crate::datasource::DataSource for HostMemorySource {
    fn len(&self) -> u64 {
        // The real size isn't known until the header is parsed; callers only
        // ever read bounded ranges out of a live mapping, so this is
        // advisory rather than load-bearing.
        u32::MAX as u64
    }

    fn read(&self, _offset: u64, _size: usize) -> Result<Vec<u8>, Error> {
        Err(Error::HostFailure(format!(
            "no real process memory backs host module '{}' outside of a real Windows host",
            self.file_name
        )))
    }
}

unsafe fn wide_str_to_string(ptr: *const u16) -> String {
    if ptr.is_null() {
        return String::new();
    }
    let mut len = 0usize;
    while *ptr.add(len) != 0 {
        len += 1;
    }
    let slice = std::slice::from_raw_parts(ptr, len);
    String::from_utf16_lossy(slice)
}

unsafe fn ansi_str_to_string(ptr: *const u8) -> String {
    if ptr.is_null() {
        return String::new();
    }
    std::ffi::CStr::from_ptr(ptr as *const core::ffi::c_char)
        .to_string_lossy()
        .into_owned()
}

/// Swap the entry-point queue out, run `body`, drain whatever the body
/// queued, then restore the outer queue — the re-entrancy dance
/// `examples/original_source/Packer/Win32Loader.cpp`'s `LoadLibraryExWProxy`
/// performs so that a `LoadLibrary` called from deep inside another image's
/// own entry point still gets its *own* freshly-loaded dependencies entered
/// before control returns to the caller.
fn with_isolated_entry_point_queue<R>(
    loader: &mut Loader,
    host: &mut dyn HostServices,
    body: impl FnOnce(&mut Loader, &mut dyn HostServices) -> R,
) -> R {
    let saved = std::mem::take(&mut loader.entry_point_queue);
    let result = body(loader, host);
    let _ = loader.execute_entry_point_queue(host);
    loader.entry_point_queue = saved;
    result
}

/// # Safety
/// Must only be called as a real `stdcall` IAT entry with a valid,
/// null-terminated wide string (or null).
pub unsafe extern "system" fn load_library_ex_w_proxy(
    library_name: *const u16,
    _h_file: *mut core::ffi::c_void,
    _flags: u32,
) -> *mut core::ffi::c_void {
    let name = wide_str_to_string(library_name);
    with_active(|loader, host| {
        with_isolated_entry_point_queue(loader, host, |loader, host| {
            loader
                .load_library(host, &name)
                .map(|base| base as *mut core::ffi::c_void)
                .unwrap_or(std::ptr::null_mut())
        })
    })
}

/// # Safety
/// See [`load_library_ex_w_proxy`].
pub unsafe extern "system" fn load_library_ex_a_proxy(
    library_name: *const u8,
    h_file: *mut core::ffi::c_void,
    flags: u32,
) -> *mut core::ffi::c_void {
    let wide: Vec<u16> = ansi_str_to_string(library_name).encode_utf16().chain(std::iter::once(0)).collect();
    load_library_ex_w_proxy(wide.as_ptr(), h_file, flags)
}

/// # Safety
/// See [`load_library_ex_w_proxy`].
pub unsafe extern "system" fn load_library_w_proxy(library_name: *const u16) -> *mut core::ffi::c_void {
    load_library_ex_w_proxy(library_name, std::ptr::null_mut(), 0)
}

/// # Safety
/// See [`load_library_ex_w_proxy`].
pub unsafe extern "system" fn load_library_a_proxy(library_name: *const u8) -> *mut core::ffi::c_void {
    load_library_ex_a_proxy(library_name, std::ptr::null_mut(), 0)
}

/// # Safety
/// Must only be called as a real `stdcall` IAT entry.
pub unsafe extern "system" fn get_module_handle_ex_w_proxy(
    _flags: u32,
    file_name: *const u16,
    result: *mut *mut core::ffi::c_void,
) -> u32 {
    with_active(|loader, host| {
        if file_name.is_null() {
            unsafe {
                *result = host.peb().image_base_address() as *mut core::ffi::c_void;
            }
            return 1;
        }
        let name = wide_str_to_string(file_name);
        for (&base, image) in loader.loaded_images.iter() {
            let combined = format!("{}/{}", image.file_path, image.file_name);
            let stripped = image.file_name.strip_suffix(".dll").unwrap_or(&image.file_name);
            if image.file_name.eq_ignore_ascii_case(&name)
                || combined.eq_ignore_ascii_case(&name)
                || stripped.eq_ignore_ascii_case(&name)
            {
                unsafe {
                    *result = base as *mut core::ffi::c_void;
                }
                return 1;
            }
        }
        unsafe {
            *result = std::ptr::null_mut();
        }
        0
    })
}

/// # Safety
/// See [`get_module_handle_ex_w_proxy`].
pub unsafe extern "system" fn get_module_handle_ex_a_proxy(
    flags: u32,
    file_name: *const u8,
    result: *mut *mut core::ffi::c_void,
) -> u32 {
    if file_name.is_null() {
        return get_module_handle_ex_w_proxy(flags, std::ptr::null(), result);
    }
    let wide: Vec<u16> = ansi_str_to_string(file_name).encode_utf16().chain(std::iter::once(0)).collect();
    get_module_handle_ex_w_proxy(flags, wide.as_ptr(), result)
}

/// # Safety
/// See [`get_module_handle_ex_w_proxy`].
pub unsafe extern "system" fn get_module_handle_w_proxy(file_name: *const u16) -> *mut core::ffi::c_void {
    let mut result = std::ptr::null_mut();
    get_module_handle_ex_w_proxy(0, file_name, &mut result);
    result
}

/// # Safety
/// See [`get_module_handle_ex_w_proxy`].
pub unsafe extern "system" fn get_module_handle_a_proxy(file_name: *const u8) -> *mut core::ffi::c_void {
    let mut result = std::ptr::null_mut();
    get_module_handle_ex_a_proxy(0, file_name, &mut result);
    result
}

/// # Safety
/// Must only be called as a real `stdcall` IAT entry.
pub unsafe extern "system" fn get_proc_address_proxy(
    library: *mut core::ffi::c_void,
    function_name: *const u8,
) -> *mut core::ffi::c_void {
    let name = ansi_str_to_string(function_name);
    with_active(|loader, host| {
        loader
            .get_function_address(host, library as u64, &name, 0)
            .map(|addr| addr as *mut core::ffi::c_void)
            .unwrap_or(std::ptr::null_mut())
    })
}

/// # Safety
/// Must only be called as a real `stdcall` IAT entry. No-op, matching
/// `examples/original_source/Packer/Win32Loader.cpp`'s `LdrAddRefDllProxy`.
pub unsafe extern "system" fn ldr_add_ref_dll_proxy(_flags: u32, _library: *mut core::ffi::c_void) -> u32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{Architecture, Image, ImageFlags, ImageInfo, Import, ImportFunction, Section};

    fn blank_image(file_name: &str, base: u64, size: u64) -> Rc<Image> {
        Rc::new(Image {
            info: ImageInfo {
                architecture: Architecture::Win32,
                base_address: base,
                entry_point: 0,
                size,
                flags: ImageFlags::empty(),
                security_cookie_va: 0,
                tls_directory_rva: 0,
            },
            file_name: file_name.to_string(),
            file_path: String::new(),
            header: vec![0u8; 0x200],
            sections: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
            name_export_len: 0,
            relocations: Vec::new(),
        })
    }

    #[test]
    fn execute_many_runs_every_image_to_completion() {
        let mut first = (*blank_image("first.exe", 0x0040_0000, 0x1000)).clone();
        first.info.entry_point = 0x10;
        let mut second = (*blank_image("second.exe", 0x0050_0000, 0x1000)).clone();
        second.info.entry_point = 0x10;
        let mut loader = Loader::new(Rc::new(first.clone()), Vec::new());
        let mut host = crate::host::FakeHost::new(0x0040_0000, 0);

        let results = loader.execute_many(&mut host, &[Rc::new(first), Rc::new(second)]);

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(host.recorded_entry_point_calls().len(), 2);
    }

    #[test]
    fn import_search_hints_precede_the_primary_images_own_folder() {
        let config = LoaderConfig {
            fallback_base_address: 0,
            import_search_hints: vec!["/opt/libs".to_string(), "/usr/local/libs".to_string()],
        };
        assert_eq!(
            import_search_hints(&config, "/home/user/packed"),
            vec!["/opt/libs".to_string(), "/usr/local/libs".to_string(), "/home/user/packed".to_string()]
        );
    }

    #[test]
    fn preferred_base_falls_back_when_image_base_is_zero() {
        let with_base = blank_image("a.dll", 0x1000_0000, 0x1000);
        let without_base = blank_image("b.dll", 0, 0x1000);
        let config = LoaderConfig {
            fallback_base_address: 0x0060_0000,
            import_search_hints: Vec::new(),
        };

        assert_eq!(preferred_base(&config, &with_base), 0x1000_0000);
        assert_eq!(preferred_base(&config, &without_base), 0x0060_0000);
    }

    #[test]
    fn execute_maps_primary_and_sets_peb() {
        let primary = blank_image("packed.exe", 0x0040_0000, 0x1000);
        let mut loader = Loader::new(Rc::clone(&primary), Vec::new());
        let mut host = crate::host::FakeHost::new(0x0040_0000, 0);

        loader.execute(&mut host).unwrap();

        assert_eq!(host.peb().image_base_address(), 0x0040_0000);
        assert!(loader.loaded_images.contains_key(&0x0040_0000));
    }

    #[test]
    fn relocations_are_adjusted_by_the_load_delta() {
        let mut primary = (*blank_image("packed.exe", 0x0040_0000, 0x2000)).clone();
        primary.sections.push(Section {
            name: ".text".to_string(),
            base_address: 0x1000,
            virtual_size: 0x10,
            data: 0x0040_1234u32.to_le_bytes().to_vec(),
            flags: SectionFlags::READ | SectionFlags::EXECUTE,
        });
        primary.relocations.push(0x1000);
        let primary = Rc::new(primary);

        let mut loader = Loader::new(Rc::clone(&primary), Vec::new());
        // Force a different actual base than the preferred one.
        let mut host = crate::host::FakeHost::new(0x0050_0000, 0);

        loader.execute(&mut host).unwrap();

        let value = host.read_u32(0x0050_0000 + 0x1000).unwrap();
        assert_eq!(value, 0x0050_1234);
    }

    #[test]
    fn split_forwarder_splits_on_last_dot() {
        assert_eq!(
            split_forwarder("api-ms-win-core-heap-l1-1-0.HeapAlloc"),
            ("api-ms-win-core-heap-l1-1-0", "HeapAlloc")
        );
        assert_eq!(split_forwarder("NTDLL.#123"), ("NTDLL", "#123"));
    }

    #[test]
    fn system_proxy_resolves_known_kernel32_exports() {
        assert!(system_proxy("kernel32.dll", "LoadLibraryExW").is_some());
        assert!(system_proxy("KERNELBASE.dll", "GetProcAddress").is_some());
        assert!(system_proxy("ntdll.dll", "LdrAddRefDll").is_some());
        assert!(system_proxy("ntdll.dll", "NtCreateFile").is_none());
        assert!(system_proxy("user32.dll", "LoadLibraryExW").is_none());
    }

    #[test]
    fn unresolved_import_writes_a_null_iat_entry() {
        let mut primary = (*blank_image("packed.exe", 0x0040_0000, 0x3000)).clone();
        primary.sections.push(Section {
            name: crate::config::IMPORT_SECTION_NAME.to_string(),
            base_address: 0x2000,
            virtual_size: 8,
            data: vec![0u8; 8],
            flags: SectionFlags::READ | SectionFlags::WRITE,
        });
        primary.imports.push(Import {
            library_name: "definitely-not-present.dll".to_string(),
            functions: vec![ImportFunction {
                ordinal: 0,
                name: "SomeFunction".to_string(),
                iat_rva: 0x2000,
            }],
        });
        let primary = Rc::new(primary);
        let mut loader = Loader::new(Rc::clone(&primary), Vec::new());
        let mut host = crate::host::FakeHost::new(0x0040_0000, 0);

        let err = loader.execute(&mut host).unwrap_err();
        assert!(matches!(err, Error::ImportNotFound(_)));
    }
}
