// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! The process-wide [`Env`] and the per-thread [`ExecCtx`] executor state.

#[cfg(test)]
mod env_test;

use core::ptr::NonNull;

#[cfg(any(test, feature = "std"))]
use std::vec::Vec;

#[cfg(not(any(test, feature = "std")))]
use alloc::vec::Vec;

use tracing::{debug, trace};

use crate::arena::{Arena, ChunkFreeList, DEFAULT_CHUNK_SIZE};
use crate::error::{ArborError, LimitKind};
use crate::module::ModuleRegistry;
use crate::symtab::SymbolTable;
use crate::value::Value;
use crate::zone::{self, ArenaMask, ArenaRef, Zone, ZoneId};

/// Configuration for an [`Env`].
#[derive(Debug, Clone, Copy)]
pub struct EnvOptions {
    pub alloc_chunk_size: usize,
}

impl Default for EnvOptions {
    fn default() -> Self {
        EnvOptions {
            alloc_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Configuration for an [`ExecCtx`].
#[derive(Debug, Clone, Copy)]
pub struct ContextOptions {
    pub max_stack_frames: usize,
    pub max_stack_size: usize,
    /// Number of arenas kept in the rotating pool; must exceed
    /// `max_stack_frames` so a fresh call frame always finds a free arena.
    pub num_arenas: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        ContextOptions {
            max_stack_frames: 256,
            max_stack_size: 16 * 1024,
            num_arenas: 32,
        }
    }
}

/// Process-wide root: allocator state, permanent zone, symbol table, and
/// the module cache. Not thread-safe; callers must not share an `Env`
/// across threads without external locking.
pub struct Env {
    pub(crate) chunk_free_list: ChunkFreeList,
    pub(crate) permanent_arena: Arena,
    pub symtab: SymbolTable,
    pub modules: ModuleRegistry,
    pub options: EnvOptions,
}

impl Env {
    #[must_use]
    pub fn create(options: EnvOptions) -> Self {
        Env {
            chunk_free_list: ChunkFreeList::new(),
            permanent_arena: Arena::new(options.alloc_chunk_size),
            symtab: SymbolTable::new(),
            modules: ModuleRegistry::new(),
            options,
        }
    }

    /// Reset the environment: drop the module cache and every chunk held
    /// by the permanent arena's free list, leaving the symbol table
    /// (symbols remain valid identifiers for the lifetime of the process).
    pub fn reset(&mut self) -> bool {
        self.modules = ModuleRegistry::new();
        self.permanent_arena.reset(&mut self.chunk_free_list);
        true
    }
}

/// Thread-local executor state: zone stack, rotating arena pool, value
/// stack, and frame stack for one logical call into the runtime.
pub struct ExecCtx<'env> {
    pub env: &'env mut Env,
    arenas: Vec<Arena>,
    error_arena: Arena,
    zones: Vec<Zone>,
    error_zone: Zone,
    permanent_zone: Zone,
    pub value_stack: Vec<Value>,
    pub(crate) frames: Vec<crate::vm::Frame>,
    /// Name of the module currently being initialized, if any.
    pub current_module: Option<crate::symtab::SymbolId>,
    /// The export map of the module currently being initialized.
    pub(crate) current_module_exports: Option<Value>,
    /// Functions registered via `module::add_loader`, tried in order by
    /// `import` when a module isn't already cached.
    pub(crate) module_loaders: Vec<Value>,
    options: ContextOptions,
}

impl<'env> ExecCtx<'env> {
    #[must_use]
    pub fn begin(env: &'env mut Env, options: ContextOptions) -> Self {
        let chunk_size = env.options.alloc_chunk_size;
        let mut arenas = Vec::with_capacity(options.num_arenas);
        arenas.push(Arena::new(chunk_size));
        let root_zone = Zone {
            parent: None,
            arena: ArenaRef::Pool(0),
            snapshot: arenas[0].snapshot(),
            level: 1,
            finalizers: Vec::new(),
            source_info: None,
        };
        let error_arena = Arena::new(chunk_size);
        let error_zone = Zone {
            parent: None,
            arena: ArenaRef::Error,
            snapshot: error_arena.snapshot(),
            level: 1,
            finalizers: Vec::new(),
            source_info: None,
        };
        let permanent_zone = Zone {
            parent: None,
            arena: ArenaRef::Permanent,
            snapshot: crate::arena::ArenaSnapshot::empty(),
            level: 0,
            finalizers: Vec::new(),
            source_info: None,
        };
        debug!("execution context begun");
        ExecCtx {
            env,
            arenas,
            error_arena,
            zones: vec![root_zone],
            error_zone,
            permanent_zone,
            value_stack: Vec::with_capacity(options.max_stack_size.min(4096)),
            frames: Vec::new(),
            current_module: None,
            current_module_exports: None,
            module_loaders: Vec::new(),
            options,
        }
    }

    #[must_use]
    pub fn get_local_zone(&self) -> ZoneId {
        ZoneId(self.zones.len() - 1)
    }

    /// The zone live when the current frame's `CALL` was issued (or the
    /// local zone if there is no active frame).
    #[must_use]
    pub fn get_return_zone(&self) -> ZoneId {
        self.frames
            .last()
            .map_or_else(|| self.get_local_zone(), |f| f.return_zone)
    }

    #[must_use]
    pub const fn get_error_zone(&self) -> ZoneId {
        ZoneId(usize::MAX)
    }

    #[must_use]
    pub const fn get_permanent_zone(&self) -> ZoneId {
        ZoneId(usize::MAX - 1)
    }

    fn zone(&self, id: ZoneId) -> &Zone {
        match id.0 {
            usize::MAX => &self.error_zone,
            x if x == usize::MAX - 1 => &self.permanent_zone,
            x => &self.zones[x],
        }
    }

    fn zone_mut(&mut self, id: ZoneId) -> &mut Zone {
        match id.0 {
            usize::MAX => &mut self.error_zone,
            x if x == usize::MAX - 1 => &mut self.permanent_zone,
            x => &mut self.zones[x],
        }
    }

    #[must_use]
    pub fn zone_level(&self, id: ZoneId) -> i32 {
        self.zone(id).level
    }

    #[must_use]
    pub fn arena_mask_of(&self, id: ZoneId) -> ArenaMask {
        match self.zone(id).arena {
            ArenaRef::Pool(i) => ArenaMask::of(i),
            ArenaRef::Permanent | ArenaRef::Error => ArenaMask::empty(),
        }
    }

    /// Bump-allocate `size` bytes aligned to `align` from `zone`'s arena.
    pub fn zone_alloc(&mut self, zone: ZoneId, size: usize, align: usize) -> NonNull<u8> {
        let arena_ref = self.zone(zone).arena;
        match arena_ref {
            ArenaRef::Pool(i) => self.arenas[i as usize].alloc(&mut self.env.chunk_free_list, size, align),
            ArenaRef::Error => self.error_arena.alloc(&mut self.env.chunk_free_list, size, align),
            ArenaRef::Permanent => self.env.permanent_arena.alloc(&mut self.env.chunk_free_list, size, align),
        }
    }

    /// Register a finalizer to run (LIFO) when `zone` exits.
    pub fn defer<F: FnOnce() + 'static>(&mut self, zone: ZoneId, f: F) {
        self.zone_mut(zone).register_finalizer(f);
    }

    /// Enter a new zone, choosing an arena disjoint from the storage of
    /// `carry`, the current zone's arena, and any value in `carry`
    /// (per the arena rotation algorithm).
    ///
    /// # Errors
    /// Returns `core/limit-reached/stack-overflow` if the zone stack or
    /// arena pool is already at its configured bound.
    pub fn zone_enter(&mut self, carry: &[Value]) -> Result<ZoneId, ArborError> {
        if self.zones.len() >= self.options.max_stack_frames {
            return Err(ArborError::LimitReached(LimitKind::StackOverflow));
        }

        let current = self.zones.last().expect("zone stack never empty");
        let carry_masks: Vec<ArenaMask> = carry.iter().map(|v| v.arena_mask()).collect();
        let in_use = zone::compute_in_use(self.arenas.len(), current.arena, &carry_masks);

        let arena_index = match zone::pick_free_arena(&in_use) {
            Some(i) => i,
            None => {
                if self.arenas.len() >= self.options.num_arenas || self.arenas.len() >= zone::MAX_ARENAS {
                    return Err(ArborError::LimitReached(LimitKind::StackOverflow));
                }
                let idx = u8::try_from(self.arenas.len()).expect("arena pool bounded by MAX_ARENAS");
                self.arenas.push(Arena::new(self.env.options.alloc_chunk_size));
                idx
            }
        };

        let parent_level = current.level;
        let snapshot = self.arenas[arena_index as usize].snapshot();
        trace!(arena = arena_index, "zone entered");
        self.zones.push(Zone {
            parent: Some(ZoneId(self.zones.len() - 1)),
            arena: ArenaRef::Pool(arena_index),
            snapshot,
            level: parent_level + 1,
            finalizers: Vec::new(),
            source_info: None,
        });
        Ok(ZoneId(self.zones.len() - 1))
    }

    /// Exit the top zone: run its finalizers LIFO, then rewind its arena.
    ///
    /// # Panics
    /// Panics if `zone` does not name the current top of the zone stack
    /// (zones are strictly nested; exit order must match entry order) or
    /// if an attempt is made to exit the permanent or error zone.
    pub fn zone_exit(&mut self, zone: ZoneId) {
        assert!(
            zone.0 != usize::MAX && zone.0 == self.zones.len() - 1,
            "zone_exit must target the current top-of-stack zone"
        );
        assert!(zone.0 > 0, "the root zone cannot be exited");
        let mut z = self.zones.pop().expect("checked non-empty above");
        z.run_finalizers();
        if let ArenaRef::Pool(i) = z.arena {
            self.arenas[i as usize].restore(&mut self.env.chunk_free_list, z.snapshot);
        }
        trace!("zone exited");
    }

    #[must_use]
    pub fn zone_of(&self, value: Value) -> Option<ZoneId> {
        value.zone_of()
    }
}

impl Drop for ExecCtx<'_> {
    fn drop(&mut self) {
        while self.zones.len() > 1 {
            let top = ZoneId(self.zones.len() - 1);
            self.zone_exit(top);
        }
        self.error_zone.run_finalizers();
        debug!("execution context ended");
    }
}

/// RAII guard returned by higher-level call sites that want a zone exited
/// automatically, even on an early `?`-return.
pub struct ZoneGuard<'ctx, 'env> {
    ctx: &'ctx mut ExecCtx<'env>,
    zone: ZoneId,
    exited: bool,
}

impl<'ctx, 'env> ZoneGuard<'ctx, 'env> {
    pub fn enter(ctx: &'ctx mut ExecCtx<'env>, carry: &[Value]) -> Result<Self, ArborError> {
        let zone = ctx.zone_enter(carry)?;
        Ok(ZoneGuard {
            ctx,
            zone,
            exited: false,
        })
    }

    #[must_use]
    pub const fn id(&self) -> ZoneId {
        self.zone
    }

    pub fn ctx(&mut self) -> &mut ExecCtx<'env> {
        self.ctx
    }

    pub fn exit(mut self) {
        self.ctx.zone_exit(self.zone);
        self.exited = true;
    }
}

impl Drop for ZoneGuard<'_, '_> {
    fn drop(&mut self) {
        if !self.exited {
            self.ctx.zone_exit(self.zone);
        }
    }
}
