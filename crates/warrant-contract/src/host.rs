//! Sandboxed execution of contract bytecode
//!
//! Values cross the host/guest boundary only as NUL-terminated UTF-8
//! strings. The host copies a string in by asking the guest's `allocate`
//! export for room, and copies a returned string out by scanning guest
//! memory for the terminator, then handing the block back through the
//! optional `deallocate` export.

use serde::{Deserialize, Serialize};
use tracing::debug;
use warrant_core::{Result, SandboxError};
use wasmtime::{
    AsContextMut, Caller, Config, Engine, Extern, Func, Instance, Linker, Memory, Module, ResourceLimiter, Store,
    Trap, TypedFunc, Val, ValType,
};

/// Default per-call fuel budget
pub const DEFAULT_FUEL_LIMIT: u64 = 10_000_000;

/// Default cap on guest linear memory (16 MiB)
pub const DEFAULT_MAX_MEMORY_BYTES: usize = 16 * 1024 * 1024;

const HOST_MODULE: &str = "env";
const MEMORY_EXPORT: &str = "memory";
const ALLOCATE_EXPORT: &str = "allocate";
const DEALLOCATE_EXPORT: &str = "deallocate";

// ================================
// Configuration
// ================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Fuel granted to every call; `None` disables metering
    pub fuel_limit: Option<u64>,
    pub max_memory_bytes: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            fuel_limit: Some(DEFAULT_FUEL_LIMIT),
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
        }
    }
}

// ================================
// Call Values
// ================================

/// Argument passed to a guest export
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    I32(i32),
    I64(i64),
    /// Copied into guest memory; the guest receives its offset
    Str(String),
}

/// Expected shape of a guest export's result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    I32,
    I64,
    /// The export returns an offset to a NUL-terminated string
    Str,
    Unit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    I32(i32),
    I64(i64),
    Str(String),
    Unit,
}

/// The one ledger entry a guest may read and write during a call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSlot {
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    /// Set once the guest calls `write_state`
    pub written: bool,
}

impl StateSlot {
    pub fn new(key: Vec<u8>, value: Option<Vec<u8>>) -> Self {
        Self {
            key,
            value,
            written: false,
        }
    }
}

// ================================
// Store Data
// ================================

/// Per-instance data reachable from import callbacks
struct HostState {
    slot: Option<StateSlot>,
    limiter: MemoryLimiter,
}

struct MemoryLimiter {
    max_bytes: usize,
    exceeded: bool,
}

impl ResourceLimiter for MemoryLimiter {
    fn memory_growing(&mut self, _current: usize, desired: usize, _maximum: Option<usize>) -> wasmtime::Result<bool> {
        if desired > self.max_bytes {
            self.exceeded = true;
            return Err(SandboxError::MemoryLimit.into());
        }
        Ok(true)
    }

    fn table_growing(&mut self, _current: u32, _desired: u32, _maximum: Option<u32>) -> wasmtime::Result<bool> {
        Ok(true)
    }
}

// ================================
// Contract Host
// ================================

/// Compiles and instantiates contract bytecode under a shared engine
pub struct ContractHost {
    engine: Engine,
    linker: Linker<HostState>,
    config: HostConfig,
}

impl ContractHost {
    pub fn new(config: HostConfig) -> Result<Self> {
        let mut engine_config = Config::new();
        engine_config.consume_fuel(config.fuel_limit.is_some());
        let engine = Engine::new(&engine_config).map_err(|e| SandboxError::Engine(e.to_string()))?;

        let mut linker = Linker::new(&engine);
        define_state_imports(&mut linker).map_err(|e| SandboxError::Engine(e.to_string()))?;

        Ok(Self {
            engine,
            linker,
            config,
        })
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Compile and instantiate `bytecode`. Malformed modules and unresolved
    /// imports fail with `SandboxError::Module`.
    pub fn instantiate(&self, bytecode: &[u8]) -> Result<SandboxInstance> {
        let module = Module::new(&self.engine, bytecode).map_err(|e| SandboxError::Module(e.to_string()))?;

        let mut store = Store::new(
            &self.engine,
            HostState {
                slot: None,
                limiter: MemoryLimiter {
                    max_bytes: self.config.max_memory_bytes,
                    exceeded: false,
                },
            },
        );
        store.limiter(|state| &mut state.limiter);
        if let Some(fuel) = self.config.fuel_limit {
            store
                .set_fuel(fuel)
                .map_err(|e| SandboxError::Engine(e.to_string()))?;
        }

        let instance = match self.linker.instantiate(&mut store, &module) {
            Ok(instance) => instance,
            Err(err) => {
                if store.data().limiter.exceeded {
                    return Err(SandboxError::MemoryLimit.into());
                }
                return Err(SandboxError::Module(err.to_string()).into());
            }
        };
        let memory = instance
            .get_memory(&mut store, MEMORY_EXPORT)
            .ok_or_else(|| SandboxError::Module("module does not export its linear memory".into()))?;

        Ok(SandboxInstance {
            store,
            instance,
            memory,
            fuel_limit: self.config.fuel_limit,
        })
    }
}

fn define_state_imports(linker: &mut Linker<HostState>) -> wasmtime::Result<()> {
    linker.func_wrap(HOST_MODULE, "read_state", |mut caller: Caller<'_, HostState>| -> wasmtime::Result<i32> {
        let Some(slot) = caller.data().slot.as_ref() else {
            return Err(unbound_state());
        };
        let value = slot.value.clone().unwrap_or_default();
        let (memory, allocate) = caller_exports(&mut caller)?;
        copy_into_guest(&mut caller, &allocate, &memory, &value)
    })?;

    linker.func_wrap(HOST_MODULE, "write_state", |mut caller: Caller<'_, HostState>, ptr: i32| -> wasmtime::Result<()> {
        if caller.data().slot.is_none() {
            return Err(unbound_state());
        }
        let (memory, _) = caller_exports(&mut caller)?;
        let text = read_c_string(memory.data(&caller), ptr as u32 as usize)?;
        if let Some(slot) = caller.data_mut().slot.as_mut() {
            slot.value = Some(text.into_bytes());
            slot.written = true;
        }
        Ok(())
    })?;

    Ok(())
}

fn unbound_state() -> wasmtime::Error {
    SandboxError::Trap("state accessed outside a bound contract call".into()).into()
}

fn caller_exports(caller: &mut Caller<'_, HostState>) -> wasmtime::Result<(Memory, TypedFunc<i32, i32>)> {
    let memory = caller
        .get_export(MEMORY_EXPORT)
        .and_then(Extern::into_memory)
        .ok_or(SandboxError::ExportNotFound(MEMORY_EXPORT.into()))?;
    let allocate = caller
        .get_export(ALLOCATE_EXPORT)
        .and_then(Extern::into_func)
        .ok_or(SandboxError::ExportNotFound(ALLOCATE_EXPORT.into()))?
        .typed::<i32, i32>(&*caller)?;
    Ok((memory, allocate))
}

/// Allocate `bytes.len() + 1` bytes in the guest and copy `bytes` plus a
/// NUL terminator there, returning the guest offset.
///
/// `bytes` must not hold a NUL itself or the guest would read it short.
fn copy_into_guest(
    mut store: impl AsContextMut,
    allocate: &TypedFunc<i32, i32>,
    memory: &Memory,
    bytes: &[u8],
) -> wasmtime::Result<i32> {
    if bytes.contains(&0) {
        return Err(SandboxError::Marshal("string contains a NUL byte".into()).into());
    }
    let len = i32::try_from(bytes.len() + 1).map_err(|_| SandboxError::Marshal("string too large for guest".into()))?;
    let ptr = allocate.call(&mut store, len)?;

    let mut buf = Vec::with_capacity(bytes.len() + 1);
    buf.extend_from_slice(bytes);
    buf.push(0);
    memory
        .write(&mut store, ptr as u32 as usize, &buf)
        .map_err(|_| SandboxError::Marshal("allocated block lies outside guest memory".into()))?;
    Ok(ptr)
}

/// Read the NUL-terminated UTF-8 string starting at `ptr`
pub fn read_c_string(data: &[u8], ptr: usize) -> std::result::Result<String, SandboxError> {
    let tail = data
        .get(ptr..)
        .ok_or_else(|| SandboxError::Marshal("string offset outside guest memory".into()))?;
    let len = tail
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| SandboxError::Marshal("string is not NUL terminated".into()))?;
    String::from_utf8(tail[..len].to_vec()).map_err(|_| SandboxError::Marshal("string is not valid UTF-8".into()))
}

// ================================
// Sandbox Instance
// ================================

/// One instantiated module with its private store
pub struct SandboxInstance {
    store: Store<HostState>,
    instance: Instance,
    memory: Memory,
    fuel_limit: Option<u64>,
}

impl SandboxInstance {
    /// Call `export` with `args`, decoding the result as `ret`
    pub fn call(&mut self, export: &str, args: &[Arg], ret: ReturnKind) -> Result<Value> {
        self.store.data_mut().limiter.exceeded = false;
        if let Some(fuel) = self.fuel_limit {
            self.store
                .set_fuel(fuel)
                .map_err(|e| SandboxError::Engine(e.to_string()))?;
        }

        let func = self
            .instance
            .get_func(&mut self.store, export)
            .ok_or_else(|| SandboxError::ExportNotFound(export.to_string()))?;
        let params = self.marshal_args(args)?;
        self.check_signature(&func, export, &params)?;

        let mut results = vec![Val::I32(0); func.ty(&self.store).results().len()];
        func.call(&mut self.store, &params, &mut results)
            .map_err(|e| self.classify(e))?;
        self.log_fuel(export);

        self.decode_result(export, &results, ret)
    }

    /// Lower the fuel granted to each following call to at most `max`.
    /// No effect when metering is off.
    pub fn cap_fuel(&mut self, max: u64) {
        self.fuel_limit = self.fuel_limit.map(|limit| limit.min(max));
    }

    /// Fuel burnt by the most recent call
    pub fn fuel_consumed(&self) -> u64 {
        match (self.fuel_limit, self.store.get_fuel()) {
            (Some(limit), Ok(left)) => limit.saturating_sub(left),
            _ => 0,
        }
    }

    /// Call `export` with `slot` bound as the guest's state.
    ///
    /// The slot is unbound again on every exit path; on success it is
    /// returned with whatever the guest wrote.
    pub fn call_with_state(
        &mut self,
        slot: StateSlot,
        export: &str,
        args: &[Arg],
        ret: ReturnKind,
    ) -> Result<(Value, StateSlot)> {
        self.store.data_mut().slot = Some(slot);
        let result = self.call(export, args, ret);
        let slot = self.store.data_mut().slot.take();

        let value = result?;
        let slot = slot.ok_or_else(|| SandboxError::Engine("state slot vanished during call".into()))?;
        Ok((value, slot))
    }

    fn marshal_args(&mut self, args: &[Arg]) -> Result<Vec<Val>> {
        let mut params = Vec::with_capacity(args.len());
        for arg in args {
            let val = match arg {
                Arg::I32(v) => Val::I32(*v),
                Arg::I64(v) => Val::I64(*v),
                Arg::Str(s) => Val::I32(self.write_string(s)?),
            };
            params.push(val);
        }
        Ok(params)
    }

    fn write_string(&mut self, s: &str) -> Result<i32> {
        let allocate = self
            .instance
            .get_typed_func::<i32, i32>(&mut self.store, ALLOCATE_EXPORT)
            .map_err(|_| SandboxError::ExportNotFound(ALLOCATE_EXPORT.into()))?;
        let memory = self.memory;
        copy_into_guest(&mut self.store, &allocate, &memory, s.as_bytes()).map_err(|e| self.classify(e).into())
    }

    fn check_signature(&self, func: &Func, export: &str, params: &[Val]) -> Result<()> {
        let ty = func.ty(&self.store);
        let expected: Vec<ValType> = ty.params().collect();
        let matches = expected.len() == params.len()
            && expected.iter().zip(params).all(|(want, got)| {
                matches!((want, got), (ValType::I32, Val::I32(_)) | (ValType::I64, Val::I64(_)))
            });
        if !matches {
            return Err(SandboxError::Marshal(format!(
                "export {export} takes {} parameters of a different shape",
                expected.len()
            ))
            .into());
        }
        Ok(())
    }

    fn decode_result(&mut self, export: &str, results: &[Val], ret: ReturnKind) -> Result<Value> {
        match (ret, results.first()) {
            (ReturnKind::Unit, _) => Ok(Value::Unit),
            (ReturnKind::I32, Some(Val::I32(v))) => Ok(Value::I32(*v)),
            (ReturnKind::I64, Some(Val::I64(v))) => Ok(Value::I64(*v)),
            (ReturnKind::Str, Some(Val::I32(ptr))) => {
                let text = read_c_string(self.memory.data(&self.store), *ptr as u32 as usize)?;
                self.release(*ptr, text.len());
                Ok(Value::Str(text))
            }
            _ => Err(SandboxError::Marshal(format!("export {export} did not return the expected {ret:?} value")).into()),
        }
    }

    /// Hand a returned string back to the guest allocator. A missing or
    /// failing `deallocate` only leaks guest memory.
    fn release(&mut self, ptr: i32, len: usize) {
        let Ok(deallocate) = self
            .instance
            .get_typed_func::<(i32, i32), ()>(&mut self.store, DEALLOCATE_EXPORT)
        else {
            debug!("Guest exports no usable deallocate, leaking {} bytes", len + 1);
            return;
        };
        let len = i32::try_from(len).unwrap_or(i32::MAX);
        if let Err(err) = deallocate.call(&mut self.store, (ptr, len)) {
            debug!("Guest deallocate failed: {}", self.classify(err));
        }
    }

    fn log_fuel(&self, export: &str) {
        if self.fuel_limit.is_some() {
            debug!("Executed {} consuming {} fuel", export, self.fuel_consumed());
        }
    }

    /// Reduce an engine error to a sandbox fault without guest addresses
    fn classify(&self, err: wasmtime::Error) -> SandboxError {
        if self.store.data().limiter.exceeded {
            return SandboxError::MemoryLimit;
        }
        if let Some(fault) = err.downcast_ref::<SandboxError>() {
            return fault.clone();
        }
        match err.downcast_ref::<Trap>() {
            Some(Trap::OutOfFuel) => SandboxError::OutOfFuel,
            Some(trap) => SandboxError::Trap(trap.to_string()),
            None => SandboxError::Trap(err.root_cause().to_string()),
        }
    }
}
