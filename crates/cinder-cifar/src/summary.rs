use std::fmt::{self, Display};

const LINE_WIDTH: usize = 65;
const NAME_WIDTH: usize = 29;
const SHAPE_WIDTH: usize = 26;

/// One row of a [ModelSummary].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerSummary {
    pub name: String,
    pub kind: &'static str,
    /// Output shape of the layer, batch dimension excluded.
    pub output_shape: Vec<usize>,
    pub num_params: usize,
}

impl LayerSummary {
    pub fn new(name: impl Into<String>, kind: &'static str, output_shape: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            kind,
            output_shape,
            num_params: 0,
        }
    }

    pub fn with_params(mut self, num_params: usize) -> Self {
        self.num_params = num_params;
        self
    }
}

/// A layer by layer description of a sequential model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelSummary {
    pub name: String,
    pub layers: Vec<LayerSummary>,
}

impl ModelSummary {
    pub fn total_params(&self) -> usize {
        self.layers.iter().map(|layer| layer.num_params).sum()
    }
}

impl Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let thin = "_".repeat(LINE_WIDTH);
        let thick = "=".repeat(LINE_WIDTH);

        writeln!(f, "Model: \"{}\"", self.name)?;
        writeln!(f, "{thin}")?;
        writeln!(
            f,
            " {:<NAME_WIDTH$}{:<SHAPE_WIDTH$}{}",
            "Layer (type)", "Output Shape", "Param #"
        )?;
        writeln!(f, "{thick}")?;

        for (index, layer) in self.layers.iter().enumerate() {
            let name = format!("{} ({})", layer.name, layer.kind);
            let shape = format_shape(&layer.output_shape);
            writeln!(
                f,
                " {name:<NAME_WIDTH$}{shape:<SHAPE_WIDTH$}{}",
                thousands(layer.num_params)
            )?;
            if index + 1 < self.layers.len() {
                writeln!(f)?;
            }
        }

        let total = self.total_params();
        writeln!(f, "{thick}")?;
        writeln!(f, "Total params: {}", thousands(total))?;
        writeln!(f, "Trainable params: {}", thousands(total))?;
        writeln!(f, "Non-trainable params: 0")?;
        write!(f, "{thin}")
    }
}

fn format_shape(shape: &[usize]) -> String {
    let dims: Vec<String> = std::iter::once("None".to_string())
        .chain(shape.iter().map(|dim| dim.to_string()))
        .collect();
    format!("({})", dims.join(", "))
}

fn thousands(value: usize) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            out.push(',');
        }
        out.push(digit);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, "0")]
    #[case(896, "896")]
    #[case(18496, "18,496")]
    #[case(1234567, "1,234,567")]
    fn params_are_grouped_by_thousands(#[case] value: usize, #[case] expected: &str) {
        assert_eq!(thousands(value), expected);
    }

    #[test]
    fn table_lists_layers_and_totals() {
        let summary = ModelSummary {
            name: "sequential".to_string(),
            layers: vec![
                LayerSummary::new("conv2d", "Conv2D", vec![32, 30, 30]).with_params(896),
                LayerSummary::new("flatten", "Flatten", vec![28800]),
            ],
        };

        let table = summary.to_string();

        assert!(table.starts_with("Model: \"sequential\""));
        assert!(table.contains(" conv2d (Conv2D)"));
        assert!(table.contains("(None, 32, 30, 30)"));
        assert!(table.contains("Total params: 896"));
        assert!(table.contains("Non-trainable params: 0"));
    }
}
