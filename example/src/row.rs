use message::Message;

use pgconv::{
    IoMode, Result, RowDescription, RowReader, SerializerOptions,
    postgres::oids,
    transport::MemoryTransport,
};

/// Hand built backend message bodies.
mod message {
    #[derive(Default)]
    pub struct Message(pub Vec<u8>);

    impl Message {
        pub fn i16(mut self, v: i16) -> Self {
            self.0.extend_from_slice(&v.to_be_bytes());
            self
        }

        pub fn i32(mut self, v: i32) -> Self {
            self.0.extend_from_slice(&v.to_be_bytes());
            self
        }

        pub fn u32(self, v: u32) -> Self {
            self.i32(v as i32)
        }

        pub fn cstr(mut self, v: &str) -> Self {
            self.0.extend_from_slice(v.as_bytes());
            self.0.push(0);
            self
        }

        pub fn field(self, name: &str, oid: u32) -> Self {
            self.cstr(name).u32(0).i16(0).u32(oid).i16(-1).i32(-1).i16(1)
        }

        pub fn value(mut self, v: Option<&[u8]>) -> Self {
            match v {
                Some(v) => {
                    self = self.i32(v.len() as i32);
                    self.0.extend_from_slice(v);
                }
                None => self = self.i32(-1),
            }
            self
        }
    }
}

pub async fn main(options: &SerializerOptions) -> Result<()> {
    let description = Message::default()
        .i16(3)
        .field("id", oids::INT4)
        .field("name", oids::TEXT)
        .field("payload", oids::BYTEA)
        .0;
    let description = RowDescription::parse(description.into())?;

    let mut rows = vec![];
    for (id, name) in [(1i32, Some("Deez")), (2, None)] {
        let row = Message::default()
            .i16(3)
            .value(Some(&id.to_be_bytes()[..]))
            .value(name.map(str::as_bytes))
            .value(Some(&[0xde, 0xad, 0xbe, 0xef][..]))
            .0;
        rows.extend(row);
    }

    // one byte at a time, suspending before every byte
    let io = MemoryTransport::new(rows).chunks([1]).pending(true);
    let mut r = options.reader(io);
    let mode = IoMode::Async;

    for _ in 0..2 {
        let mut row = RowReader::new(mode, &mut r, &description, options).await?;
        let id = row.get::<i32>(mode, "id").await?;
        let name = row.get::<Option<String>>(mode, "name").await?;
        tracing::info!(id, ?name, "row");
        // payload is never read and skipped
        row.finish(mode).await?;
    }

    Ok(())
}
