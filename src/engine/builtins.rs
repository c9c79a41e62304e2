//! Arduino builtin command factories (C10).

use crate::command::{Command, RequestId};
use crate::error::EngineError;
use crate::value::{Value, ValueType};

use super::{Engine, Flow};

fn arg_i32(args: &[Value], i: usize, name: &str) -> Result<i32, EngineError> {
    args.get(i)
        .and_then(|v| match v {
            Value::I32(n) => Some(*n),
            Value::I64(n) => Some(*n as i32),
            Value::U32(n) => Some(*n as i32),
            Value::Bool(b) => Some(*b as i32),
            _ => None,
        })
        .ok_or_else(|| EngineError::type_error(format!("`{name}` expects an integer argument at position {i}")))
}

fn arg_u32(args: &[Value], i: usize, name: &str) -> Result<u32, EngineError> {
    arg_i32(args, i, name).map(|v| v as u32)
}

impl Engine {
    /// Dispatches a plain-identifier call to the Arduino builtin table.
    /// Returns `None` when `name` is not a recognised builtin, so the caller
    /// falls through to user-function lookup.
    pub(crate) fn call_builtin(&mut self, name: &str, args: &[Value]) -> Option<Result<Value, Flow>> {
        Some(match name {
            "pinMode" => self.builtin_pin_mode(args),
            "digitalWrite" => self.builtin_digital_write(args),
            "analogWrite" => self.builtin_analog_write(args),
            "digitalRead" => self.builtin_digital_read(args),
            "analogRead" => self.builtin_analog_read(args),
            "millis" => self.builtin_millis(),
            "micros" => self.builtin_micros(),
            "delay" => self.builtin_delay(args),
            "delayMicroseconds" => self.builtin_delay_microseconds(args),
            "tone" => self.builtin_tone(args),
            "noTone" => self.builtin_no_tone(args),
            "Serial.begin" => self.builtin_serial_begin(args),
            "Serial.print" => self.builtin_serial_print(args),
            "Serial.println" => self.builtin_serial_println(args),
            _ => return None,
        })
    }

    /// A `library_object.method(args)` call on anything other than `Serial`
    /// (e.g. `myServo.write(90)`): dispatched as an async `LIBRARY_METHOD_REQUEST`
    /// (§4.7 Recognised library objects).
    pub(crate) fn call_library_method(&mut self, object: &str, method: &str, args: Vec<Value>) -> Result<Value, Flow> {
        if let Some(value) = self.resume_value.take() {
            return Ok(value);
        }
        let request_id = self.dispatcher.open(ValueType::Int32);
        let object = object.to_owned();
        let method = method.to_owned();
        self.emitter.emit(|timestamp| Command::LibraryMethodRequest {
            object,
            method,
            args,
            request_id: request_id.clone(),
            timestamp,
        });
        Err(Flow::Suspend(request_id))
    }

    /// Shared by every async builtin: if a response was just delivered for
    /// this exact suspension point, consume it instead of emitting a new
    /// request (see `engine.rs` module doc on statement-level resumption).
    fn request_async(
        &mut self,
        expected_type: ValueType,
        make_command: impl FnOnce(RequestId, u64) -> Command,
    ) -> Result<Value, Flow> {
        if let Some(value) = self.resume_value.take() {
            return Ok(value);
        }
        let request_id = self.dispatcher.open(expected_type);
        self.emitter.emit(|timestamp| make_command(request_id.clone(), timestamp));
        Err(Flow::Suspend(request_id))
    }

    fn builtin_pin_mode(&mut self, args: &[Value]) -> Result<Value, Flow> {
        let pin = arg_i32(args, 0, "pinMode").map_err(Flow::Error)?;
        let mode = arg_i32(args, 1, "pinMode").map_err(Flow::Error)?;
        self.emitter.emit(|timestamp| Command::PinMode { pin, mode, timestamp });
        Ok(Value::Void)
    }

    fn builtin_digital_write(&mut self, args: &[Value]) -> Result<Value, Flow> {
        let pin = arg_i32(args, 0, "digitalWrite").map_err(Flow::Error)?;
        let value = arg_i32(args, 1, "digitalWrite").map_err(Flow::Error)?;
        self.emitter.emit(|timestamp| Command::DigitalWrite { pin, value, timestamp });
        Ok(Value::Void)
    }

    fn builtin_analog_write(&mut self, args: &[Value]) -> Result<Value, Flow> {
        let pin = arg_i32(args, 0, "analogWrite").map_err(Flow::Error)?;
        let value = arg_i32(args, 1, "analogWrite").map_err(Flow::Error)?;
        self.emitter.emit(|timestamp| Command::AnalogWrite { pin, value, timestamp });
        Ok(Value::Void)
    }

    fn builtin_digital_read(&mut self, args: &[Value]) -> Result<Value, Flow> {
        let pin = arg_i32(args, 0, "digitalRead").map_err(Flow::Error)?;
        self.request_async(ValueType::Bool, move |request_id, timestamp| Command::DigitalReadRequest {
            pin,
            request_id,
            timestamp,
        })
    }

    fn builtin_analog_read(&mut self, args: &[Value]) -> Result<Value, Flow> {
        let pin = arg_i32(args, 0, "analogRead").map_err(Flow::Error)?;
        self.request_async(ValueType::Int32, move |request_id, timestamp| Command::AnalogReadRequest {
            pin,
            request_id,
            timestamp,
        })
    }

    fn builtin_millis(&mut self) -> Result<Value, Flow> {
        self.request_async(ValueType::UInt32, |request_id, timestamp| Command::MillisRequest { request_id, timestamp })
    }

    fn builtin_micros(&mut self) -> Result<Value, Flow> {
        self.request_async(ValueType::UInt32, |request_id, timestamp| Command::MicrosRequest { request_id, timestamp })
    }

    fn builtin_delay(&mut self, args: &[Value]) -> Result<Value, Flow> {
        let duration = arg_u32(args, 0, "delay").map_err(Flow::Error)? as u64;
        self.emitter.emit(|timestamp| Command::Delay {
            duration,
            actual_delay: duration,
            timestamp,
        });
        Ok(Value::Void)
    }

    fn builtin_delay_microseconds(&mut self, args: &[Value]) -> Result<Value, Flow> {
        let duration = arg_u32(args, 0, "delayMicroseconds").map_err(Flow::Error)? as u64;
        self.emitter.emit(|timestamp| Command::DelayMicroseconds {
            duration,
            actual_delay: duration,
            timestamp,
        });
        Ok(Value::Void)
    }

    fn builtin_tone(&mut self, args: &[Value]) -> Result<Value, Flow> {
        let pin = arg_i32(args, 0, "tone").map_err(Flow::Error)?;
        let frequency = arg_u32(args, 1, "tone").map_err(Flow::Error)?;
        let duration = args.get(2).map(|_| arg_u32(args, 2, "tone")).transpose().map_err(Flow::Error)?.unwrap_or(0);
        self.emitter.emit(|timestamp| Command::Tone {
            pin,
            frequency,
            duration,
            timestamp,
        });
        Ok(Value::Void)
    }

    fn builtin_no_tone(&mut self, args: &[Value]) -> Result<Value, Flow> {
        let pin = arg_i32(args, 0, "noTone").map_err(Flow::Error)?;
        self.emitter.emit(|timestamp| Command::NoTone { pin, timestamp });
        Ok(Value::Void)
    }

    fn builtin_serial_begin(&mut self, args: &[Value]) -> Result<Value, Flow> {
        let baud_rate = arg_u32(args, 0, "Serial.begin").map_err(Flow::Error)?;
        let arguments = args.to_vec();
        self.emitter.emit(|timestamp| Command::SerialBegin {
            arguments,
            baud_rate,
            timestamp,
            message: format!("Serial.begin({baud_rate})"),
        });
        Ok(Value::Void)
    }

    fn builtin_serial_print(&mut self, args: &[Value]) -> Result<Value, Flow> {
        let data = args.first().map(Value::to_arduino_string).unwrap_or_default();
        let arguments = args.to_vec();
        self.emitter.emit(|timestamp| Command::SerialPrint {
            arguments,
            data: data.clone(),
            timestamp,
            message: format!("Serial.print({data})"),
        });
        Ok(Value::Void)
    }

    fn builtin_serial_println(&mut self, args: &[Value]) -> Result<Value, Flow> {
        let data = args.first().map(Value::to_arduino_string).unwrap_or_default();
        let arguments = args.to_vec();
        self.emitter.emit(|timestamp| Command::SerialPrintln {
            arguments,
            data: data.clone(),
            timestamp,
            message: format!("Serial.println({data})"),
        });
        Ok(Value::Void)
    }
}
