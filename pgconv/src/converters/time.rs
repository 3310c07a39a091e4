use futures_core::future::BoxFuture;
use std::sync::Arc;
use time::{
    Date, Duration, OffsetDateTime, PrimitiveDateTime, UtcDateTime,
    format_description::{BorrowedFormatItem as I, Component as C, modifier},
};

use crate::{
    Error, IoMode, PgConverter, PgReader, PgWriter, Result, WriteState,
    converter::DynConverter,
    info::TypeInfoOptions,
    postgres::{DataFormat, PgTypeId, oids},
    resolver::{PgConverterResolver, Resolution},
    size::{BufferRequirements, Size, SizeContext},
};

/// Julian day of `2000-01-01`, the postgres epoch.
const PG_EPOCH_JULIAN_DAY: i32 = 2_451_545;

const PRIMITIVE_PG_EPOCH: PrimitiveDateTime = {
    let date = match Date::from_julian_day(PG_EPOCH_JULIAN_DAY) {
        Ok(ok) => ok,
        Err(_) => panic!("postgres epoch is a valid date"),
    };
    PrimitiveDateTime::new(date, time::Time::MIDNIGHT)
};

const UTC_PG_EPOCH: UtcDateTime = UtcDateTime::new(PRIMITIVE_PG_EPOCH.date(), time::Time::MIDNIGHT);

/// `YYYY-MM-DD hh:mm:ss[.ffffff]`
const DESCRIPTION: &[I<'_>] = &[
    I::Component(C::Year(modifier::Year::default())),
    I::Literal(b"-"),
    I::Component(C::Month(modifier::Month::default())),
    I::Literal(b"-"),
    I::Component(C::Day(modifier::Day::default())),
    I::Literal(b" "),
    I::Component(C::Hour(modifier::Hour::default())),
    I::Literal(b":"),
    I::Component(C::Minute(modifier::Minute::default())),
    I::Literal(b":"),
    I::Component(C::Second(modifier::Second::default())),
    I::Optional(&I::Compound(&[
        I::Literal(b"."),
        I::Component(C::Subsecond(modifier::Subsecond::default())),
    ])),
];

fn to_micros(duration: Duration, pg: &str) -> Result<i64> {
    i64::try_from(duration.whole_microseconds())
        .map_err(|_|Error::unsupported(format!("{pg} value out of range")))
}

fn from_micros<T>(micros: i64, pg: &str, add: impl FnOnce(Duration) -> Option<T>) -> Result<T> {
    if micros == i64::MAX || micros == i64::MIN {
        return Err(Error::unsupported(format!("infinite {pg} cannot be represented")));
    }
    add(Duration::microseconds(micros))
        .ok_or_else(||Error::unsupported(format!("{pg} value out of range")))
}

async fn read_i64(mode: IoMode, reader: &mut PgReader) -> Result<i64> {
    if reader.should_buffer(8) {
        reader.buffer(mode, 8).await?;
    }
    Ok(reader.read_i64())
}

async fn write_i64(mode: IoMode, writer: &mut PgWriter, value: i64) -> Result<()> {
    if writer.should_flush(Size::create(8))? {
        writer.flush(mode).await?;
    }
    writer.write_i64(value);
    Ok(())
}

fn binary_only(format: DataFormat, size: i32) -> Option<BufferRequirements> {
    match format {
        DataFormat::Binary => Some(BufferRequirements::create_fixed_size(size)),
        DataFormat::Text => None,
    }
}

/// `timestamp` converter.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampConverter;

impl PgConverter<PrimitiveDateTime> for TimestampConverter {
    fn can_convert(&self, format: DataFormat) -> Option<BufferRequirements> {
        match format {
            DataFormat::Binary => Some(BufferRequirements::create_fixed_size(8)),
            DataFormat::Text => Some(BufferRequirements::value()),
        }
    }

    fn get_size(&self, context: SizeContext, value: &PrimitiveDateTime, _: &mut Option<WriteState>) -> Result<Size> {
        match context.format {
            DataFormat::Binary => Ok(Size::create(8)),
            DataFormat::Text => Ok(Size::create(format_text(value)?.len() as i32)),
        }
    }

    fn read<'a>(&'a self, mode: IoMode, reader: &'a mut PgReader) -> BoxFuture<'a, Result<PrimitiveDateTime>> {
        Box::pin(async move {
            match reader.format() {
                DataFormat::Binary => {
                    let micros = read_i64(mode, reader).await?;
                    from_micros(micros, "timestamp", |d|PRIMITIVE_PG_EPOCH.checked_add(d))
                }
                DataFormat::Text => {
                    let bytes = reader.read_remaining(mode).await?;
                    let text = std::str::from_utf8(&bytes)?;
                    PrimitiveDateTime::parse(text, DESCRIPTION)
                        .map_err(|err|Error::unsupported(format!("invalid timestamp text {text:?}: {err}")))
                }
            }
        })
    }

    fn write<'a>(&'a self, mode: IoMode, writer: &'a mut PgWriter, value: &'a PrimitiveDateTime) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match writer.current().format {
                DataFormat::Binary => write_i64(mode, writer, to_micros(*value - PRIMITIVE_PG_EPOCH, "timestamp")?).await,
                DataFormat::Text => writer.write_bytes(mode, format_text(value)?.as_bytes()).await,
            }
        })
    }
}

fn format_text(value: &PrimitiveDateTime) -> Result<String> {
    value.format(DESCRIPTION).map_err(|err|Error::unsupported(format!("cannot format timestamp: {err}")))
}

/// `timestamptz` converter, binary format only.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampTzConverter;

impl PgConverter<UtcDateTime> for TimestampTzConverter {
    fn can_convert(&self, format: DataFormat) -> Option<BufferRequirements> {
        binary_only(format, 8)
    }

    fn get_size(&self, _: SizeContext, _: &UtcDateTime, _: &mut Option<WriteState>) -> Result<Size> {
        Ok(Size::create(8))
    }

    fn read<'a>(&'a self, mode: IoMode, reader: &'a mut PgReader) -> BoxFuture<'a, Result<UtcDateTime>> {
        Box::pin(async move {
            let micros = read_i64(mode, reader).await?;
            from_micros(micros, "timestamptz", |d|UTC_PG_EPOCH.checked_add(d))
        })
    }

    fn write<'a>(&'a self, mode: IoMode, writer: &'a mut PgWriter, value: &'a UtcDateTime) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            write_i64(mode, writer, to_micros(*value - UTC_PG_EPOCH, "timestamptz")?).await
        })
    }
}

/// [`OffsetDateTime`] as `timestamptz`, read back with UTC offset.
#[derive(Debug, Clone, Copy, Default)]
pub struct OffsetTimestampTzConverter;

impl PgConverter<OffsetDateTime> for OffsetTimestampTzConverter {
    fn can_convert(&self, format: DataFormat) -> Option<BufferRequirements> {
        binary_only(format, 8)
    }

    fn get_size(&self, _: SizeContext, _: &OffsetDateTime, _: &mut Option<WriteState>) -> Result<Size> {
        Ok(Size::create(8))
    }

    fn read<'a>(&'a self, mode: IoMode, reader: &'a mut PgReader) -> BoxFuture<'a, Result<OffsetDateTime>> {
        Box::pin(async move {
            let micros = read_i64(mode, reader).await?;
            from_micros(micros, "timestamptz", |d|PRIMITIVE_PG_EPOCH.assume_utc().checked_add(d))
        })
    }

    fn write<'a>(&'a self, mode: IoMode, writer: &'a mut PgWriter, value: &'a OffsetDateTime) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let micros = to_micros(*value - PRIMITIVE_PG_EPOCH.assume_utc(), "timestamptz")?;
            write_i64(mode, writer, micros).await
        })
    }
}

/// [`OffsetDateTime`] as `timestamp`, the offset is dropped on write and read back as UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct OffsetTimestampConverter;

impl PgConverter<OffsetDateTime> for OffsetTimestampConverter {
    fn can_convert(&self, format: DataFormat) -> Option<BufferRequirements> {
        binary_only(format, 8)
    }

    fn get_size(&self, _: SizeContext, _: &OffsetDateTime, _: &mut Option<WriteState>) -> Result<Size> {
        Ok(Size::create(8))
    }

    fn read<'a>(&'a self, mode: IoMode, reader: &'a mut PgReader) -> BoxFuture<'a, Result<OffsetDateTime>> {
        Box::pin(async move {
            let micros = read_i64(mode, reader).await?;
            from_micros(micros, "timestamp", |d|PRIMITIVE_PG_EPOCH.checked_add(d).map(PrimitiveDateTime::assume_utc))
        })
    }

    fn write<'a>(&'a self, mode: IoMode, writer: &'a mut PgWriter, value: &'a OffsetDateTime) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let local = PrimitiveDateTime::new(value.date(), value.time());
            write_i64(mode, writer, to_micros(local - PRIMITIVE_PG_EPOCH, "timestamp")?).await
        })
    }
}

/// `date` converter, binary format only.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateConverter;

impl PgConverter<Date> for DateConverter {
    fn can_convert(&self, format: DataFormat) -> Option<BufferRequirements> {
        binary_only(format, 4)
    }

    fn get_size(&self, _: SizeContext, _: &Date, _: &mut Option<WriteState>) -> Result<Size> {
        Ok(Size::create(4))
    }

    fn read<'a>(&'a self, mode: IoMode, reader: &'a mut PgReader) -> BoxFuture<'a, Result<Date>> {
        Box::pin(async move {
            if reader.should_buffer(4) {
                reader.buffer(mode, 4).await?;
            }
            let days = reader.read_i32();
            if days == i32::MAX || days == i32::MIN {
                return Err(Error::unsupported("infinite date cannot be represented"));
            }
            days.checked_add(PG_EPOCH_JULIAN_DAY)
                .and_then(|day|Date::from_julian_day(day).ok())
                .ok_or_else(||Error::unsupported("date value out of range"))
        })
    }

    fn write<'a>(&'a self, mode: IoMode, writer: &'a mut PgWriter, value: &'a Date) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if writer.should_flush(Size::create(4))? {
                writer.flush(mode).await?;
            }
            writer.write_i32(value.to_julian_day() - PG_EPOCH_JULIAN_DAY);
            Ok(())
        })
    }
}

/// Value driven resolver of [`OffsetDateTime`].
///
/// A UTC value resolves to `timestamptz`, any other offset to `timestamp`.
pub struct OffsetDateTimeResolver {
    timestamp: Resolution<OffsetDateTime>,
    timestamptz: Resolution<OffsetDateTime>,
}

impl OffsetDateTimeResolver {
    pub fn new(options: &TypeInfoOptions) -> Result<OffsetDateTimeResolver> {
        Ok(OffsetDateTimeResolver {
            timestamp: Resolution::new(
                Arc::new(OffsetTimestampConverter) as DynConverter<OffsetDateTime>,
                options.canonical(&oids::TIMESTAMP.into())?,
            ),
            timestamptz: Resolution::new(
                Arc::new(OffsetTimestampTzConverter) as DynConverter<OffsetDateTime>,
                options.canonical(&oids::TIMESTAMPTZ.into())?,
            ),
        })
    }
}

impl PgConverterResolver<OffsetDateTime> for OffsetDateTimeResolver {
    fn get_default(&self, pg_type_id: Option<&PgTypeId>) -> Result<Resolution<OffsetDateTime>> {
        match pg_type_id {
            None => Ok(self.timestamptz.clone()),
            Some(id) if *id == self.timestamptz.pg_type_id => Ok(self.timestamptz.clone()),
            Some(id) if *id == self.timestamp.pg_type_id => Ok(self.timestamp.clone()),
            Some(id) => Err(Error::unsupported(format!("cannot convert {id} as OffsetDateTime"))),
        }
    }

    fn get(&self, value: &OffsetDateTime, expected: Option<&PgTypeId>) -> Result<Option<Resolution<OffsetDateTime>>> {
        if expected.is_some() {
            return self.get_default(expected).map(Some);
        }
        match value.offset().is_utc() {
            true => Ok(Some(self.timestamptz.clone())),
            false => Ok(Some(self.timestamp.clone())),
        }
    }
}

impl std::fmt::Debug for OffsetDateTimeResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffsetDateTimeResolver")
            .field("timestamp", &self.timestamp.pg_type_id)
            .field("timestamptz", &self.timestamptz.pg_type_id)
            .finish()
    }
}
