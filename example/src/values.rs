use futures::try_join;
use serde::{Deserialize, Serialize};
use std::ops::Bound;
use time::{OffsetDateTime, macros::datetime};

use pgconv::{
    IoMode, OptionsBuilder, PgReader, PgWriter, Result, SerializerOptions,
    converters::{Json, PgRange},
    mapping::TypeInfoMappingCollection,
    plugins::json_type,
    transport::TokioTransport,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Account {
    id: i64,
    tags: Vec<String>,
}

async fn write<T: Send + Sync + 'static>(w: &mut PgWriter, options: &SerializerOptions, value: &T) -> Result<()> {
    let info = options.type_info::<T>(None)?;
    let res = info.resolve(value, None)?;
    tracing::debug!(pg_type_id = ?res.pg_type_id, "write");
    w.write_value(IoMode::Async, &*res.converter, value).await
}

async fn read<T: Send + Sync + 'static>(r: &mut PgReader, options: &SerializerOptions) -> Result<Option<T>> {
    let info = options.type_info::<T>(None)?;
    let res = info.get_default_resolution(None)?;
    r.read_value(IoMode::Async, &*res.converter).await
}

pub async fn main() -> Result<()> {
    let mut accounts = TypeInfoMappingCollection::new();
    json_type::<Account>(&mut accounts, true);
    let options = OptionsBuilder::from_env()?.resolver(accounts).build();

    // small pipe so writes suspend until the reader catches up
    let (client, server) = tokio::io::duplex(64);
    let mut w = options.writer(TokioTransport::new(client));
    let mut r = options.reader(TokioTransport::new(server));

    let range = PgRange::from_bounds(Bound::Included(1i64), Bound::Excluded(10));
    let names = vec![Some(String::from("Deez")), None];
    let at = datetime!(2025-04-01 12:00 UTC);
    let account = Json(Account { id: 420, tags: vec!["admin".into(), "ops".into()] });

    let writes = async {
        write(&mut w, &options, &420i32).await?;
        write(&mut w, &options, &String::from("Foo")).await?;
        write(&mut w, &options, &None::<bool>).await?;
        write(&mut w, &options, &range).await?;
        write(&mut w, &options, &names).await?;
        write(&mut w, &options, &at).await?;
        write(&mut w, &options, &account).await?;
        w.send(IoMode::Async).await
    };

    let reads = async {
        let id = read::<i32>(&mut r, &options).await?;
        let name = read::<String>(&mut r, &options).await?;
        let flag = read::<Option<bool>>(&mut r, &options).await?;
        let range = read::<PgRange<i64>>(&mut r, &options).await?;
        let names = read::<Vec<Option<String>>>(&mut r, &options).await?;
        let at = read::<OffsetDateTime>(&mut r, &options).await?;
        let account = read::<Json<Account>>(&mut r, &options).await?;
        Ok::<_, pgconv::Error>((id, name, flag, range, names, at, account))
    };

    let ((), (id, name, flag, range2, names2, at2, account2)) = try_join!(writes, reads)?;

    assert_eq!(id, Some(420));
    assert_eq!(name.as_deref(), Some("Foo"));
    assert_eq!(flag, None);
    assert_eq!(range2, Some(range));
    assert_eq!(names2, Some(names));
    assert_eq!(at2, Some(at));
    assert_eq!(account2, Some(account));

    tracing::info!(?id, ?name, ?range2, ?names2, ?at2, ?account2, "values round trip");
    Ok(())
}
