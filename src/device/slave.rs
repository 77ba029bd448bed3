use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::data::{DataStore, DiscreteCollection, FileRecord, ModbusDataType};
use crate::message::factory::{decode_message, FrameDecoder};
use crate::message::{
    DecodeMessage, ModbusMessage, ModbusMessageFrame, ReadCoilsInputsRequest,
    ReadCoilsInputsResponse, ReadFileRecordRequest, ReadFileRecordResponse,
    ReadHoldingInputRegistersResponse, SlaveExceptionResponse, WriteMultipleCoilsResponse,
    WriteMultipleRegistersResponse,
};
use crate::modbus::protocol::*;
use crate::utils::error::{ModbusError, ModbusResult};

pub type CustomHandler =
    Arc<dyn Fn(&ModbusMessage, &DataStore) -> ModbusResult<ModbusMessage> + Send + Sync>;
pub type RequestListener = Arc<dyn Fn(&ModbusMessage) + Send + Sync>;

/// A function code served by caller supplied code.
#[derive(Clone)]
pub struct CustomFunction {
    decoder: FrameDecoder,
    handler: CustomHandler,
    rtu_request_bytes: Option<fn(&[u8]) -> usize>,
}

impl CustomFunction {
    /// Requests are decoded as `T` and answered by `handler`.
    pub fn new<T, F>(handler: F) -> Self
    where
        T: DecodeMessage,
        F: Fn(&ModbusMessage, &DataStore) -> ModbusResult<ModbusMessage> + Send + Sync + 'static,
    {
        Self {
            decoder: decode_message::<T>,
            handler: Arc::new(handler),
            rtu_request_bytes: None,
        }
    }

    /// Remaining request bytes on RTU once the 7 byte frame start is read.
    pub fn with_rtu_request_bytes(mut self, rule: fn(&[u8]) -> usize) -> Self {
        self.rtu_request_bytes = Some(rule);
        self
    }
}

impl std::fmt::Debug for CustomFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomFunction")
            .field("rtu_request_bytes", &self.rtu_request_bytes.is_some())
            .finish_non_exhaustive()
    }
}

/// Cooperative stop flag shared by the blocking listen loops.
#[derive(Debug, Clone, Default)]
pub struct SlaveShutdown(Arc<AtomicBool>);

impl SlaveShutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Request handling shared by every slave transport. Cloning shares the
/// data store and the custom function registry.
#[derive(Clone)]
pub struct ModbusSlave {
    unit_id: u8,
    data_store: Arc<DataStore>,
    custom_functions: Arc<RwLock<HashMap<u8, CustomFunction>>>,
    request_listeners: Arc<RwLock<Vec<RequestListener>>>,
}

impl ModbusSlave {
    pub fn new(unit_id: u8, data_store: Arc<DataStore>) -> Self {
        Self {
            unit_id,
            data_store,
            custom_functions: Arc::new(RwLock::new(HashMap::new())),
            request_listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn data_store(&self) -> &Arc<DataStore> {
        &self.data_store
    }

    /// Called with every request before it is applied.
    pub fn on_request_received<F>(&self, listener: F) -> ModbusResult<()>
    where
        F: Fn(&ModbusMessage) + Send + Sync + 'static,
    {
        self.request_listeners.write()?.push(Arc::new(listener));
        Ok(())
    }

    pub fn register_custom_function(&self, function_code: u8, function: CustomFunction) -> ModbusResult<()> {
        let mut functions = self.custom_functions.write()?;
        if functions.contains_key(&function_code) {
            return Err(ModbusError::DuplicateFunction(function_code));
        }
        functions.insert(function_code, function);
        info!("🔧 Registered custom function {} on slave {}", function_code, self.unit_id);
        Ok(())
    }

    pub fn unregister_custom_function(&self, function_code: u8) -> ModbusResult<()> {
        match self.custom_functions.write()?.remove(&function_code) {
            Some(_) => {
                info!("🔧 Unregistered custom function {} on slave {}", function_code, self.unit_id);
                Ok(())
            }
            None => Err(ModbusError::FunctionNotFound(function_code)),
        }
    }

    /// Serves read file record (0x14) with `reader` supplying each record.
    pub fn register_file_record_function<F>(&self, reader: F) -> ModbusResult<()>
    where
        F: Fn(&FileRecord) -> ModbusResult<Vec<u16>> + Send + Sync + 'static,
    {
        let function = CustomFunction::new::<ReadFileRecordRequest, _>(move |request, _store| {
            let typed = request
                .as_custom::<ReadFileRecordRequest>()
                .ok_or(ModbusError::UnsupportedFunctionCode(request.function_code()))?;

            let response_length: usize = typed
                .records
                .iter()
                .map(|record| record.record_length as usize * 2 + 2)
                .sum();
            if response_length > MAX_FILE_RECORD_RESPONSE_LENGTH {
                return Err(ModbusError::ArgumentOutOfRange(format!(
                    "File record response of {} bytes exceeds {}",
                    response_length, MAX_FILE_RECORD_RESPONSE_LENGTH
                )));
            }

            let mut response = ReadFileRecordResponse::new(typed.slave_address(), Vec::new());
            for record in typed.records.iter() {
                let registers = reader(record)?;
                if registers.len() != record.record_length as usize {
                    return Err(ModbusError::InvalidData(format!(
                        "File {} record {} returned {} register(s), {} requested",
                        record.file_number,
                        record.record_number,
                        registers.len(),
                        record.record_length
                    )));
                }
                let bytes: Vec<u8> = registers.iter().flat_map(|r| r.to_be_bytes()).collect();
                response.add_record_data(&bytes);
            }
            Ok(response.into_message())
        })
        .with_rtu_request_bytes(ReadFileRecordRequest::rtu_request_bytes_remaining);

        self.register_custom_function(READ_FILE_RECORD, function)
    }

    pub fn custom_request_decoder(&self, function_code: u8) -> ModbusResult<Option<FrameDecoder>> {
        Ok(self
            .custom_functions
            .read()?
            .get(&function_code)
            .map(|function| function.decoder))
    }

    /// RTU length rule of a registered function, if it supplied one.
    pub fn custom_rtu_request_bytes(&self, function_code: u8, frame_start: &[u8]) -> ModbusResult<Option<usize>> {
        Ok(self
            .custom_functions
            .read()?
            .get(&function_code)
            .and_then(|function| function.rtu_request_bytes)
            .map(|rule| rule(frame_start)))
    }

    /// Routes `request` to a registered handler or a built-in one.
    pub fn apply_request(&self, request: &ModbusMessage) -> ModbusResult<ModbusMessage> {
        debug!("Applying request {}", request);

        let listeners: Vec<RequestListener> = self.request_listeners.read()?.clone();
        for listener in listeners {
            listener(request);
        }

        let handler = self
            .custom_functions
            .read()?
            .get(&request.function_code())
            .map(|function| function.handler.clone());
        if let Some(handler) = handler {
            return handler(request, &self.data_store);
        }

        self.apply_builtin(request)
    }

    /// Like [`apply_request`](Self::apply_request) but errors become exception responses.
    pub fn process_request(&self, request: &ModbusMessage) -> ModbusMessage {
        match self.apply_request(request) {
            Ok(response) => response,
            Err(e) => {
                warn!("⚠️  Request {} failed: {}", request, e);
                exception_response_for(request.slave_address(), request.function_code(), &e)
            }
        }
    }

    fn apply_builtin(&self, request: &ModbusMessage) -> ModbusResult<ModbusMessage> {
        let store = &self.data_store;

        match request {
            ModbusMessage::ReadCoilsInputsRequest(typed) => read_discretes(store, typed),
            ModbusMessage::ReadHoldingInputRegistersRequest(typed) => {
                let data_type = if typed.function_code() == READ_HOLDING_REGISTERS {
                    ModbusDataType::HoldingRegister
                } else {
                    ModbusDataType::InputRegister
                };
                let data = store.read_registers(data_type, typed.start_address, typed.number_of_points)?;
                Ok(ReadHoldingInputRegistersResponse::new(typed.function_code(), typed.slave_address(), data)
                    .into_message())
            }
            ModbusMessage::WriteSingleCoil(typed) => {
                store.write_discretes(ModbusDataType::Coil, typed.start_address, &[typed.coil_state])?;
                Ok(request.clone())
            }
            ModbusMessage::WriteSingleRegister(typed) => {
                store.write_registers(ModbusDataType::HoldingRegister, typed.start_address, &[typed.value])?;
                Ok(request.clone())
            }
            ModbusMessage::WriteMultipleCoilsRequest(typed) => {
                // padding bits past the declared count are never written
                store.write_discretes(ModbusDataType::Coil, typed.start_address, typed.declared_values())?;
                Ok(WriteMultipleCoilsResponse::new(
                    typed.slave_address(),
                    typed.start_address,
                    typed.number_of_points,
                )
                .into_message())
            }
            ModbusMessage::WriteMultipleRegistersRequest(typed) => {
                store.write_registers(ModbusDataType::HoldingRegister, typed.start_address, &typed.data)?;
                Ok(WriteMultipleRegistersResponse::new(
                    typed.slave_address(),
                    typed.start_address,
                    typed.number_of_points,
                )
                .into_message())
            }
            ModbusMessage::ReadWriteMultipleRegistersRequest(typed) => {
                store.write_registers(
                    ModbusDataType::HoldingRegister,
                    typed.write_start_address,
                    &typed.write_data,
                )?;
                let data = store.read_registers(
                    ModbusDataType::HoldingRegister,
                    typed.read_start_address,
                    typed.number_of_points_to_read,
                )?;
                Ok(ReadHoldingInputRegistersResponse::new(typed.function_code(), typed.slave_address(), data)
                    .into_message())
            }
            ModbusMessage::Diagnostics(typed) => {
                if typed.sub_function_code != DIAGNOSTICS_RETURN_QUERY_DATA {
                    warn!("Diagnostics sub-function {} not supported", typed.sub_function_code);
                    return Err(ModbusError::UnsupportedFunctionCode(typed.function_code()));
                }
                Ok(request.clone())
            }
            other => Err(ModbusError::UnsupportedFunctionCode(other.function_code())),
        }
    }
}

impl std::fmt::Debug for ModbusSlave {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusSlave")
            .field("unit_id", &self.unit_id)
            .finish_non_exhaustive()
    }
}

fn read_discretes(store: &DataStore, request: &ReadCoilsInputsRequest) -> ModbusResult<ModbusMessage> {
    let data_type = if request.function_code() == READ_COILS {
        ModbusDataType::Coil
    } else {
        ModbusDataType::Input
    };
    let data: DiscreteCollection = store.read_discretes(data_type, request.start_address, request.number_of_points)?;
    Ok(ReadCoilsInputsResponse::new(request.function_code(), request.slave_address(), data).into_message())
}

/// Exception code reported for an error raised while serving a request.
pub fn exception_code_for(error: &ModbusError) -> SlaveExceptionCode {
    match error {
        ModbusError::ArgumentOutOfRange(_) => SlaveExceptionCode::IllegalDataAddress,
        ModbusError::UnsupportedFunctionCode(_) => SlaveExceptionCode::IllegalFunction,
        ModbusError::SlaveException { exception, .. } => *exception,
        _ => SlaveExceptionCode::SlaveDeviceFailure,
    }
}

pub fn exception_response_for(slave_address: u8, function_code: u8, error: &ModbusError) -> ModbusMessage {
    SlaveExceptionResponse::for_request(slave_address, function_code, exception_code_for(error)).into_message()
}
