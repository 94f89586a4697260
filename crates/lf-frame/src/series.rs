use std::fmt;

use lf_columnar::Column;
use lf_core::{Block, LocalFrame};
use lf_expr::{BinaryOp, ColumnExpr, Expr, OrderingColumnReference, UNNAMED_COLUMN_ID, WindowSpec, global_ids};
use lf_index::Index;
use lf_ops::{AggregateOp, BinaryOperation, UnaryOperation, WindowOp, fillna_op};
use lf_runtime::api_call;
use lf_types::Scalar;

use crate::{DataFrame, FrameError, FromBlock, Operand, Rolling, SharedClient};

const CLASS: &str = "Series";

/// One lazily evaluated column plus its index.
#[derive(Clone)]
pub struct Series {
    block: Block,
    name: String,
    client: SharedClient,
}

impl fmt::Debug for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Series")
            .field("name", &self.name)
            .field("index_columns", &self.block.index_columns())
            .finish_non_exhaustive()
    }
}

impl FromBlock for Series {
    fn from_block(block: Block, client: SharedClient) -> Result<Self, FrameError> {
        let names = block.value_column_names();
        let [name] = names.as_slice() else {
            return Err(FrameError::NotASeries(names.len()));
        };
        let name = (*name).to_owned();
        Ok(Self {
            block,
            name,
            client,
        })
    }
}

impl Series {
    pub fn new(block: Block, client: SharedClient) -> Result<Self, FrameError> {
        Self::from_block(block, client)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn block(&self) -> &Block {
        &self.block
    }

    #[must_use]
    pub fn client(&self) -> &SharedClient {
        &self.client
    }

    pub fn expr(&self) -> Result<&Expr, FrameError> {
        Ok(self.block.value_column(&self.name)?.expr())
    }

    fn with_value(&self, name: &str, expr: Expr) -> Result<Self, FrameError> {
        let block = self.block.copy(Some(vec![ColumnExpr::new(name, expr)]))?;
        Self::from_block(block, self.client.clone())
    }

    fn with_block(&self, block: Block) -> Result<Self, FrameError> {
        Self::from_block(block, self.client.clone())
    }

    pub fn rename(&self, name: &str) -> Result<Self, FrameError> {
        api_call(CLASS, "rename", || self.with_value(name, self.expr()?.clone()))
    }

    /// Run the query and return the labelled rows.
    pub fn to_local(&self) -> Result<LocalFrame, FrameError> {
        api_call(CLASS, "to_local", || {
            Ok(self.block.compute(self.client.as_ref(), None)?)
        })
    }

    /// Fetch index and values as realized parts.
    pub fn to_column(&self) -> Result<(Index, Column), FrameError> {
        let (index, table) = self.to_local()?.into_parts();
        let (column, _) = table
            .remove(&self.name)
            .map_err(lf_core::CoreError::from)?;
        Ok((index, column))
    }

    pub fn sql(&self) -> Result<String, FrameError> {
        api_call(CLASS, "sql", || Ok(self.block.sql(None)?))
    }

    fn unary(&self, method: &'static str, op: UnaryOperation) -> Result<Self, FrameError> {
        api_call(CLASS, method, || {
            let expr = op.apply(self.expr()?)?;
            self.with_value(&self.name, expr)
        })
    }

    pub fn abs(&self) -> Result<Self, FrameError> {
        self.unary("abs", UnaryOperation::Abs)
    }

    /// `~s`: logical not for booleans, negation for numbers.
    pub fn invert(&self) -> Result<Self, FrameError> {
        self.unary("invert", UnaryOperation::Invert)
    }

    pub fn isnull(&self) -> Result<Self, FrameError> {
        self.unary("isnull", UnaryOperation::IsNull)
    }

    pub fn notnull(&self) -> Result<Self, FrameError> {
        self.unary("notnull", UnaryOperation::NotNull)
    }

    pub fn str_len(&self) -> Result<Self, FrameError> {
        self.unary("str_len", UnaryOperation::Len)
    }

    pub fn str_reverse(&self) -> Result<Self, FrameError> {
        self.unary("str_reverse", UnaryOperation::Reverse)
    }

    pub fn fillna<'a>(&self, value: impl Into<Operand<'a>>) -> Result<Self, FrameError> {
        let value = value.into();
        api_call(CLASS, "fillna", || {
            let filled = fillna_op(self.expr()?, &value.resolve(&self.block)?)?;
            self.with_value(&self.name, filled)
        })
    }

    fn binary<'a>(
        &self,
        method: &'static str,
        op: BinaryOperation,
        other: impl Into<Operand<'a>>,
    ) -> Result<Self, FrameError> {
        let other = other.into();
        api_call(CLASS, method, || {
            let rhs = other.resolve(&self.block)?;
            let expr = op.apply(self.expr()?, &rhs)?;
            // pandas keeps the name only when both operands share it
            let name = match &other {
                Operand::Series(series) if series.name() != self.name => {
                    global_ids().next_id(UNNAMED_COLUMN_ID)
                }
                _ => self.name.clone(),
            };
            self.with_value(&name, expr)
        })
    }

    pub fn add<'a>(&self, other: impl Into<Operand<'a>>) -> Result<Self, FrameError> {
        self.binary("add", BinaryOperation::new(BinaryOp::Add), other)
    }

    pub fn radd<'a>(&self, other: impl Into<Operand<'a>>) -> Result<Self, FrameError> {
        self.binary("radd", BinaryOperation::new(BinaryOp::Add).reverse(), other)
    }

    pub fn sub<'a>(&self, other: impl Into<Operand<'a>>) -> Result<Self, FrameError> {
        self.binary("sub", BinaryOperation::new(BinaryOp::Sub), other)
    }

    pub fn rsub<'a>(&self, other: impl Into<Operand<'a>>) -> Result<Self, FrameError> {
        self.binary("rsub", BinaryOperation::new(BinaryOp::Sub).reverse(), other)
    }

    pub fn mul<'a>(&self, other: impl Into<Operand<'a>>) -> Result<Self, FrameError> {
        self.binary("mul", BinaryOperation::new(BinaryOp::Mul), other)
    }

    pub fn div<'a>(&self, other: impl Into<Operand<'a>>) -> Result<Self, FrameError> {
        self.binary("truediv", BinaryOperation::new(BinaryOp::Div), other)
    }

    pub fn rdiv<'a>(&self, other: impl Into<Operand<'a>>) -> Result<Self, FrameError> {
        self.binary("rtruediv", BinaryOperation::new(BinaryOp::Div).reverse(), other)
    }

    pub fn floordiv<'a>(&self, other: impl Into<Operand<'a>>) -> Result<Self, FrameError> {
        self.binary("floordiv", BinaryOperation::new(BinaryOp::FloorDiv), other)
    }

    pub fn rfloordiv<'a>(&self, other: impl Into<Operand<'a>>) -> Result<Self, FrameError> {
        self.binary(
            "rfloordiv",
            BinaryOperation::new(BinaryOp::FloorDiv).reverse(),
            other,
        )
    }

    pub fn modulo<'a>(&self, other: impl Into<Operand<'a>>) -> Result<Self, FrameError> {
        self.binary("mod", BinaryOperation::new(BinaryOp::Mod), other)
    }

    pub fn rmod<'a>(&self, other: impl Into<Operand<'a>>) -> Result<Self, FrameError> {
        self.binary("rmod", BinaryOperation::new(BinaryOp::Mod).reverse(), other)
    }

    pub fn eq<'a>(&self, other: impl Into<Operand<'a>>) -> Result<Self, FrameError> {
        self.binary("eq", BinaryOperation::new(BinaryOp::Eq), other)
    }

    pub fn ne<'a>(&self, other: impl Into<Operand<'a>>) -> Result<Self, FrameError> {
        self.binary("ne", BinaryOperation::new(BinaryOp::Ne), other)
    }

    pub fn lt<'a>(&self, other: impl Into<Operand<'a>>) -> Result<Self, FrameError> {
        self.binary("lt", BinaryOperation::new(BinaryOp::Lt), other)
    }

    pub fn le<'a>(&self, other: impl Into<Operand<'a>>) -> Result<Self, FrameError> {
        self.binary("le", BinaryOperation::new(BinaryOp::Le), other)
    }

    pub fn gt<'a>(&self, other: impl Into<Operand<'a>>) -> Result<Self, FrameError> {
        self.binary("gt", BinaryOperation::new(BinaryOp::Gt), other)
    }

    pub fn ge<'a>(&self, other: impl Into<Operand<'a>>) -> Result<Self, FrameError> {
        self.binary("ge", BinaryOperation::new(BinaryOp::Ge), other)
    }

    pub fn and<'a>(&self, other: impl Into<Operand<'a>>) -> Result<Self, FrameError> {
        self.binary("and", BinaryOperation::new(BinaryOp::And), other)
    }

    pub fn or<'a>(&self, other: impl Into<Operand<'a>>) -> Result<Self, FrameError> {
        self.binary("or", BinaryOperation::new(BinaryOp::Or), other)
    }

    fn reduce(&self, method: &'static str, op: AggregateOp) -> Result<Scalar, FrameError> {
        api_call(CLASS, method, || {
            let reduced = self.block.aggregate(None, &[(self.name.as_str(), op)], false)?;
            let frame = reduced.compute(self.client.as_ref(), None)?;
            frame
                .column(&self.name)
                .and_then(|column| column.value(0))
                .cloned()
                .ok_or(FrameError::EmptyReduction(method))
        })
    }

    pub fn sum(&self) -> Result<Scalar, FrameError> {
        self.reduce("sum", AggregateOp::Sum)
    }

    pub fn mean(&self) -> Result<Scalar, FrameError> {
        self.reduce("mean", AggregateOp::Mean)
    }

    pub fn min(&self) -> Result<Scalar, FrameError> {
        self.reduce("min", AggregateOp::Min)
    }

    pub fn max(&self) -> Result<Scalar, FrameError> {
        self.reduce("max", AggregateOp::Max)
    }

    pub fn count(&self) -> Result<Scalar, FrameError> {
        self.reduce("count", AggregateOp::Count)
    }

    pub fn all(&self) -> Result<bool, FrameError> {
        Ok(self.reduce("all", AggregateOp::All)?.to_bool()?)
    }

    pub fn any(&self) -> Result<bool, FrameError> {
        Ok(self.reduce("any", AggregateOp::Any)?.to_bool()?)
    }

    fn window(
        &self,
        method: &'static str,
        op: WindowOp,
        spec: &WindowSpec,
    ) -> Result<Self, FrameError> {
        api_call(CLASS, method, || {
            let block = self.block.apply_window_op(&self.name, op, spec, &self.name)?;
            self.with_block(block)
        })
    }

    pub fn cumsum(&self) -> Result<Self, FrameError> {
        self.window(
            "cumsum",
            WindowOp::Cumulative(AggregateOp::Sum),
            &WindowSpec::cumulative(),
        )
    }

    pub fn cummax(&self) -> Result<Self, FrameError> {
        self.window(
            "cummax",
            WindowOp::Cumulative(AggregateOp::Max),
            &WindowSpec::cumulative(),
        )
    }

    pub fn cummin(&self) -> Result<Self, FrameError> {
        self.window(
            "cummin",
            WindowOp::Cumulative(AggregateOp::Min),
            &WindowSpec::cumulative(),
        )
    }

    /// Positive periods pull earlier rows forward, negative pull later rows back.
    pub fn shift(&self, periods: i64) -> Result<Self, FrameError> {
        self.window("shift", WindowOp::Shift(periods), &WindowSpec::unbounded())
    }

    /// Equal-width bin codes, as `pd.cut(s, bins, labels=False)`.
    pub fn cut(&self, bins: i64, labels: Option<bool>) -> Result<Self, FrameError> {
        let op = lf_ops::cut(bins, labels)?;
        self.window("cut", op, &WindowSpec::unbounded())
    }

    pub fn rolling(&self, window: u64, min_periods: Option<u64>) -> Result<Rolling<Self>, FrameError> {
        api_call(CLASS, "rolling", || {
            let spec = WindowSpec::rolling(window, min_periods)?;
            Ok(Rolling::new(
                self.block.clone(),
                vec![self.name.clone()],
                spec,
                self.client.clone(),
            ))
        })
    }

    pub fn filter(&self, mask: &Series) -> Result<Self, FrameError> {
        api_call(CLASS, "filter", || {
            let predicate = self.block.align_column(mask.block(), mask.name())?;
            self.with_block(self.block.filter(&predicate)?)
        })
    }

    pub fn sort_values(&self, ascending: bool) -> Result<Self, FrameError> {
        api_call(CLASS, "sort_values", || {
            let key = if ascending {
                OrderingColumnReference::asc(&self.name)
            } else {
                OrderingColumnReference::desc(&self.name)
            };
            self.with_block(self.block.order_by(&[key])?)
        })
    }

    pub fn head(&self, n: u64) -> Result<Self, FrameError> {
        api_call(CLASS, "head", || self.with_block(self.block.head(n)?))
    }

    pub fn tail(&self, n: u64) -> Result<Self, FrameError> {
        api_call(CLASS, "tail", || self.with_block(self.block.tail(n)?))
    }

    pub fn reset_index(&self) -> Result<DataFrame, FrameError> {
        api_call(CLASS, "reset_index", || {
            DataFrame::from_block(self.block.reset_index()?, self.client.clone())
        })
    }

    pub fn to_frame(&self) -> DataFrame {
        DataFrame::new(self.block.clone(), self.client.clone())
    }
}

#[cfg(test)]
mod tests {
    use lf_columnar::{Column, RealizedTable};
    use lf_index::Index;
    use lf_ops::OpError;
    use lf_runtime::global_usage;
    use lf_types::{DType, NullKind, Scalar};

    use crate::FrameError;
    use crate::test_support::{frame, frame_of};

    /// `pos` fixes the row order; `v` holds the values under test.
    fn positioned(v: Column) -> RealizedTable {
        let pos = (0..v.len())
            .map(|row| Scalar::Int64(i64::try_from(row).expect("row")))
            .collect();
        RealizedTable::from_pairs([("pos", Column::from_values(pos).expect("pos")), ("v", v)])
            .expect("table")
    }

    #[test]
    fn arithmetic_between_series_of_one_frame() {
        let (_, df) = frame();
        let val = df.get("val").expect("val");
        let id = df.get("id").expect("id");
        let total = val.add(&id).expect("add");
        assert!(total.name().starts_with("lf_unnamed_column_"));
        let (_, column) = total.to_column().expect("compute");
        assert_eq!(
            column.values(),
            &[Scalar::Int64(11), Scalar::Int64(-18), Scalar::Int64(33)]
        );
        let doubled = val.mul(2_i64).expect("mul");
        assert_eq!(doubled.name(), "val");
    }

    #[test]
    fn pandas_modulo_and_floor_division_by_scalars() {
        let (_, df) = frame();
        let val = df.get("val").expect("val");
        let (_, rem) = val.modulo(-7_i64).expect("mod").to_column().expect("rem");
        assert_eq!(
            rem.values(),
            &[Scalar::Int64(-4), Scalar::Int64(-6), Scalar::Int64(-5)]
        );
        let (_, zero) = val.floordiv(0_i64).expect("floordiv").to_column().expect("zero");
        assert_eq!(
            zero.values(),
            &[Scalar::Int64(0), Scalar::Int64(0), Scalar::Int64(0)]
        );
        let (_, true_div) = val.div(4_i64).expect("div").to_column().expect("div");
        assert_eq!(true_div.values()[0], Scalar::Float64(2.5));
    }

    #[test]
    fn reductions_run_one_query_each() {
        let (engine, df) = frame();
        let val = df.get("val").expect("val");
        assert_eq!(val.sum().expect("sum"), Scalar::Int64(20));
        assert_eq!(val.max().expect("max"), Scalar::Int64(30));
        assert_eq!(val.count().expect("count"), Scalar::Int64(3));
        assert!(val.all().expect("all"));
        assert_eq!(engine.query_count(), 4);
    }

    #[test]
    fn numeric_guard_rejects_strings_before_querying() {
        let (engine, df) = frame();
        let err = df.get("name").expect("name").mean().expect_err("string mean");
        assert!(matches!(err, FrameError::Core(lf_core::CoreError::Op(OpError::NonNumeric { .. }))));
        assert_eq!(engine.query_count(), 0);
    }

    #[test]
    fn boolean_reductions_over_no_rows_use_identities() {
        let (_, df) = frame();
        let val = df.get("val").expect("val");
        let empty = val
            .filter(&val.gt(1000_i64).expect("gt"))
            .expect("filter");
        assert!(empty.all().expect("all"));
        assert!(!empty.any().expect("any"));
    }

    #[test]
    fn cumulative_and_shift_follow_row_order() {
        let (_, df) = frame();
        let val = df.get("val").expect("val");
        let (_, cumsum) = val.cumsum().expect("cumsum").to_column().expect("cumsum");
        assert_eq!(
            cumsum.values(),
            &[Scalar::Int64(10), Scalar::Int64(-10), Scalar::Int64(20)]
        );
        let (_, shifted) = val.shift(1).expect("shift").to_column().expect("shift");
        assert_eq!(
            shifted.values(),
            &[Scalar::NULL, Scalar::Int64(10), Scalar::Int64(-20)]
        );
    }

    #[test]
    fn cumulative_ops_skip_missing_rows() {
        let v = Column::from_values(vec![Scalar::Int64(1), Scalar::NULL, Scalar::Int64(2)])
            .expect("v");
        let (_, df) = frame_of(positioned(v));
        let v = df.get("v").expect("v");
        let (_, cumsum) = v.cumsum().expect("cumsum").to_column().expect("cumsum");
        assert_eq!(cumsum.values(), &[Scalar::Int64(1), Scalar::NULL, Scalar::Int64(3)]);
        let (_, cummax) = v.cummax().expect("cummax").to_column().expect("cummax");
        assert_eq!(cummax.values(), &[Scalar::Int64(1), Scalar::NULL, Scalar::Int64(2)]);
        let (_, cummin) = v.cummin().expect("cummin").to_column().expect("cummin");
        assert!(cummin.values()[1].is_null());
        assert_eq!(cummin.values()[2], Scalar::Int64(1));
    }

    #[test]
    fn boolean_reductions_over_all_null_use_identities() {
        let v = Column::new(DType::Int64, vec![Scalar::NULL, Scalar::NULL]).expect("v");
        let (engine, df) = frame_of(positioned(v));
        let v = df.get("v").expect("v");
        assert!(v.all().expect("all"));
        assert!(!v.any().expect("any"));
        assert_eq!(engine.query_count(), 2);
    }

    #[test]
    fn rolling_mean_is_null_until_min_periods() {
        let (_, df) = frame();
        let rolled = df
            .get("val")
            .expect("val")
            .rolling(2, None)
            .expect("rolling")
            .mean()
            .expect("mean");
        let (_, values) = rolled.to_column().expect("compute");
        assert_eq!(
            values.values(),
            &[
                Scalar::Null(NullKind::NaN),
                Scalar::Float64(-5.0),
                Scalar::Float64(5.0)
            ]
        );
    }

    #[test]
    fn cut_assigns_equal_width_bins() {
        let (_, df) = frame();
        let (_, bins) = df
            .get("val")
            .expect("val")
            .cut(2, Some(false))
            .expect("cut")
            .to_column()
            .expect("compute");
        assert_eq!(
            bins.values(),
            &[Scalar::Int64(1), Scalar::Int64(0), Scalar::Int64(1)]
        );
        let err = df.get("val").expect("val").cut(0, Some(false)).expect_err("bins");
        assert!(matches!(err, FrameError::Op(OpError::InvalidArgument(_))));
    }

    #[test]
    fn sort_and_tail_keep_index_labels() {
        let (_, df) = frame();
        let sorted = df
            .set_index("id")
            .expect("index")
            .get("val")
            .expect("val")
            .sort_values(false)
            .expect("sort")
            .tail(2)
            .expect("tail");
        let (index, values) = sorted.to_column().expect("compute");
        assert_eq!(values.values(), &[Scalar::Int64(10), Scalar::Int64(-20)]);
        assert_eq!(
            index,
            Index::from_i64(vec![1, 2]).with_name(Some("id".to_owned()))
        );
    }

    #[test]
    fn calls_are_recorded_in_the_usage_log() {
        let (_, df) = frame();
        df.get("val").expect("val").abs().expect("abs");
        assert!(global_usage().labels("Series").contains(&"abs".to_owned()));
    }
}
