use std::sync::Arc;

use lazyframes::{
    AggregateOp, Column, CoreError, DType, FrameError, Index, IndexLabel, LocalEngine, LocalFrame,
    OpError, ReadTableOptions, RealizedTable, Scalar, Session, SessionConfig, TableId, concat,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct NamedValues {
    name: String,
    values: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct Expected {
    index: Vec<i64>,
    columns: Vec<NamedValues>,
}

#[derive(Debug, Deserialize)]
struct Fixture {
    table: String,
    columns: Vec<NamedValues>,
    index_col: String,
    select: Vec<String>,
    expected: Expected,
}

fn ints(values: &[i64]) -> Column {
    Column::from_values(values.iter().copied().map(Scalar::Int64).collect()).expect("column")
}

fn to_table(columns: &[NamedValues]) -> RealizedTable {
    RealizedTable::from_pairs(
        columns
            .iter()
            .map(|column| (column.name.as_str(), ints(&column.values))),
    )
    .expect("table")
}

fn session_with(id: &str, table: RealizedTable) -> (Arc<LocalEngine>, Session) {
    let table_id = id.parse::<TableId>().expect("table id");
    let engine = Arc::new(LocalEngine::new().with_table(table_id, table));
    let session = Session::new(SessionConfig::default().with_project("proj"), engine.clone());
    (engine, session)
}

#[test]
fn projected_value_column_is_indexed_by_id() {
    let fixture: Fixture =
        serde_json::from_str(include_str!("fixtures/end_to_end.json")).expect("fixture");
    let (engine, session) = session_with(&fixture.table, to_table(&fixture.columns));
    let select = fixture.select.iter().map(String::as_str).collect::<Vec<_>>();

    let df = session
        .read_table(&fixture.table, &ReadTableOptions::default())
        .expect("read")
        .set_index(&fixture.index_col)
        .expect("set_index")
        .select(&select)
        .expect("select");
    assert_eq!(engine.query_count(), 0);

    let out = df.to_local().expect("materialize");
    assert_eq!(engine.query_count(), 1);
    assert_eq!(out.table(), &to_table(&fixture.expected.columns));
    assert_eq!(
        out.index(),
        &Index::from_i64(fixture.expected.index.clone()).with_name(Some(fixture.index_col.clone()))
    );
}

#[test]
fn compiled_sql_is_deterministic_and_lazy() {
    let (engine, session) = session_with(
        "proj.ds.t",
        RealizedTable::from_pairs([("a", ints(&[1, 2])), ("b", ints(&[3, 4]))]).expect("table"),
    );
    let df = session
        .read_table("proj.ds.t", &ReadTableOptions::default())
        .expect("read");
    let a = df.get("a").expect("a");
    let shaped = df
        .assign("c", &a.add(&df.get("b").expect("b")).expect("add"))
        .expect("assign")
        .filter(&a.gt(1_i64).expect("gt"))
        .expect("filter");
    let first = shaped.sql().expect("sql");
    assert_eq!(first, shaped.sql().expect("sql again"));
    assert!(first.contains("FROM `proj.ds.t`"));
    assert_eq!(engine.query_count(), 0);
}

#[test]
fn pandas_division_semantics_survive_the_engine() {
    let (_, session) = session_with(
        "proj.ds.m",
        RealizedTable::from_pairs([("x", ints(&[7, -7, 7, 5])), ("y", ints(&[-2, 2, 0, 0]))])
            .expect("table"),
    );
    let df = session
        .read_table("proj.ds.m", &ReadTableOptions::default())
        .expect("read")
        .sort_values(&["x", "y"], true)
        .expect("sort");
    let x = df.get("x").expect("x");
    let y = df.get("y").expect("y");
    let out = df
        .assign("mod", &x.modulo(&y).expect("mod"))
        .expect("assign mod")
        .assign("floordiv", &x.floordiv(&y).expect("floordiv"))
        .expect("assign floordiv")
        .to_local()
        .expect("compute");
    // rows sorted by (x, y): (-7, 2), (5, 0), (7, -2), (7, 0)
    assert_eq!(
        out.column("mod").expect("mod").values(),
        &[Scalar::Int64(1), Scalar::Int64(0), Scalar::Int64(-1), Scalar::Int64(0)]
    );
    assert_eq!(
        out.column("floordiv").expect("floordiv").values(),
        &[Scalar::Int64(-4), Scalar::Int64(0), Scalar::Int64(-4), Scalar::Int64(0)]
    );
}

#[test]
fn uploaded_frames_group_and_reduce() {
    let (_, session) = session_with(
        "proj.ds.unused",
        RealizedTable::from_pairs([("z", ints(&[0]))]).expect("table"),
    );
    let local = LocalFrame::new(
        Index::range(4),
        RealizedTable::from_pairs([
            (
                "key",
                Column::from_values(vec![
                    Scalar::from("b"),
                    Scalar::from("a"),
                    Scalar::from("b"),
                    Scalar::from("a"),
                ])
                .expect("key"),
            ),
            ("amount", ints(&[1, 2, 3, 4])),
        ])
        .expect("table"),
    );
    let df = session.read_local(&local).expect("upload");
    let grouped = df
        .groupby("key", true)
        .expect("groupby")
        .mean()
        .expect("mean")
        .to_local()
        .expect("compute");
    assert_eq!(
        grouped.index().labels(),
        &[IndexLabel::from("a"), IndexLabel::from("b")]
    );
    assert_eq!(
        grouped.column("amount").expect("amount").values(),
        &[Scalar::Float64(3.0), Scalar::Float64(2.0)]
    );

    let amount = df.get("amount").expect("amount");
    assert_eq!(amount.sum().expect("sum"), Scalar::Int64(10));
    let empty = amount.filter(&amount.lt(0_i64).expect("lt")).expect("filter");
    assert!(empty.all().expect("all"));
    assert!(!empty.any().expect("any"));
}

#[test]
fn invalid_operations_never_reach_the_engine() {
    let (engine, session) = session_with(
        "proj.ds.s",
        RealizedTable::from_pairs([(
            "name",
            Column::new(DType::Utf8, vec![Scalar::from("x")]).expect("name"),
        )])
        .expect("table"),
    );
    let df = session
        .read_table("proj.ds.s", &ReadTableOptions::default())
        .expect("read");
    let err = df.get("name").expect("name").sum().expect_err("string sum");
    assert!(matches!(
        err,
        FrameError::Core(CoreError::Op(OpError::NonNumeric { .. }))
    ));
    let err = df.aggregate(AggregateOp::Mean).expect_err("string mean");
    assert!(matches!(err, FrameError::Core(CoreError::Op(_))));
    assert!(matches!(
        df.get("missing").expect_err("missing"),
        FrameError::Core(CoreError::UnknownColumn(_))
    ));
    assert_eq!(engine.query_count(), 0);
}

#[test]
fn local_frames_serialize_to_json() {
    let (_, session) = session_with(
        "proj.ds.j",
        RealizedTable::from_pairs([("id", ints(&[2, 1])), ("v", ints(&[20, 10]))]).expect("table"),
    );
    let out = session
        .read_table("proj.ds.j", &ReadTableOptions::default().with_index_col("id"))
        .expect("read")
        .to_local()
        .expect("compute");
    let json = serde_json::to_string(&out).expect("serialize");
    let back: LocalFrame = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, out);
    assert_eq!(
        back.index(),
        &Index::from_i64(vec![1, 2]).with_name(Some("id".to_owned()))
    );
}

#[test]
fn query_and_table_sources_concatenate_in_one_query() {
    let sql = "SELECT a, b FROM proj.ds.t WHERE a > 1";
    let table_id = "proj.ds.t".parse::<TableId>().expect("table id");
    let engine = Arc::new(
        LocalEngine::new()
            .with_table(
                table_id,
                RealizedTable::from_pairs([("a", ints(&[1, 2])), ("b", ints(&[3, 4]))])
                    .expect("table"),
            )
            .with_query(
                sql,
                RealizedTable::from_pairs([("a", ints(&[2])), ("b", ints(&[4]))]).expect("rows"),
            ),
    );
    let session = Session::new(SessionConfig::default(), engine.clone());
    let options = ReadTableOptions::default();

    let table = session.read("proj.ds.t", &options).expect("table");
    let query = session.read(sql, &options).expect("query");
    let stacked = concat(&[table, query], true).expect("concat");
    assert!(stacked.sql().expect("sql").contains("UNION ALL"));
    assert_eq!(engine.query_count(), 0);

    let out = stacked.to_local().expect("materialize");
    assert_eq!(engine.query_count(), 1);
    assert_eq!(
        out.table(),
        &RealizedTable::from_pairs([("a", ints(&[1, 2, 2])), ("b", ints(&[3, 4, 4]))])
            .expect("expected")
    );
    assert_eq!(out.index(), &Index::range(3));
}
