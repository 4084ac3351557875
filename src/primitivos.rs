use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::str::FromStr;

/// Valores com módulo a partir deste limite são tratados como inválidos.
///
/// Nenhum campo monetário do Sped chega perto disso, e o limite garante que
/// somas e produtos do agregador nunca estourem a capacidade do `Decimal`.
const VALOR_MAXIMO: Decimal = dec!(1000000000000000000);

/// Resultado da análise de um campo.
///
/// Distingue o campo legitimamente vazio do campo preenchido com lixo,
/// embora ambos acabem no mesmo valor padrão para quem chama `parse_*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Analise<T> {
    Valor(T),
    Vazio,
    Invalido,
}

impl<T> Analise<T> {
    /// Retorna o valor analisado ou o padrão informado.
    pub fn ou(self, padrao: T) -> T {
        match self {
            Analise::Valor(valor) => valor,
            Analise::Vazio | Analise::Invalido => padrao,
        }
    }

    pub fn valor(self) -> Option<T> {
        match self {
            Analise::Valor(valor) => Some(valor),
            Analise::Vazio | Analise::Invalido => None,
        }
    }

    pub fn is_invalido(&self) -> bool {
        matches!(self, Analise::Invalido)
    }
}

/// Analisa um número no formato do Sped (vírgula como separador decimal).
///
/// Apenas a primeira vírgula é trocada por ponto: "1.234,56" não é um valor
/// válido do Sped e resulta em `Invalido`.
pub fn analisar_decimal(texto: &str) -> Analise<Decimal> {
    let texto = texto.trim();
    if texto.is_empty() {
        return Analise::Vazio;
    }

    match Decimal::from_str(&texto.replacen(',', ".", 1)) {
        Ok(valor) if valor.abs() < VALOR_MAXIMO => Analise::Valor(valor),
        _ => Analise::Invalido,
    }
}

/// Converte um número do Sped em `Decimal`, retornando `padrao` para campo
/// vazio ou inválido. Nunca falha.
///
/// ```
/// use rust_decimal_macros::dec;
/// use sped_devolucoes_reforma::parse_decimal;
///
/// assert_eq!(parse_decimal("1234,56", dec!(0)), dec!(1234.56));
/// assert_eq!(parse_decimal("   ", dec!(7)), dec!(7));
/// assert_eq!(parse_decimal("abc", dec!(0)), dec!(0));
/// ```
pub fn parse_decimal(texto: &str, padrao: Decimal) -> Decimal {
    analisar_decimal(texto).ou(padrao)
}

/// Analisa uma data no formato DDMMAAAA.
pub fn analisar_data(texto: &str) -> Analise<NaiveDate> {
    if texto.is_empty() {
        return Analise::Vazio;
    }

    if texto.len() != 8 || !texto.bytes().all(|b| b.is_ascii_digit()) {
        return Analise::Invalido;
    }

    // Os 8 bytes são dígitos ASCII: os fatiamentos abaixo são seguros.
    let dia = texto[0..2].parse::<u32>();
    let mes = texto[2..4].parse::<u32>();
    let ano = texto[4..8].parse::<i32>();

    match (dia, mes, ano) {
        (Ok(d), Ok(m), Ok(a)) => NaiveDate::from_ymd_opt(a, m, d)
            .map(Analise::Valor)
            .unwrap_or(Analise::Invalido),
        _ => Analise::Invalido,
    }
}

/// Converte DDMMAAAA em data. Data ausente significa "desconhecida", não erro.
pub fn parse_data(texto: &str) -> Option<NaiveDate> {
    analisar_data(texto).valor()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_com_virgula() {
        assert_eq!(analisar_decimal("10,50"), Analise::Valor(dec!(10.50)));
        assert_eq!(analisar_decimal("-0,01"), Analise::Valor(dec!(-0.01)));
        assert_eq!(analisar_decimal(" 7 "), Analise::Valor(dec!(7)));
    }

    #[test]
    fn decimal_vazio_difere_de_invalido() {
        assert_eq!(analisar_decimal(""), Analise::Vazio);
        assert_eq!(analisar_decimal("  \t"), Analise::Vazio);
        assert_eq!(analisar_decimal("12x"), Analise::Invalido);
        // Separador de milhar não existe no Sped.
        assert_eq!(analisar_decimal("1.234,56"), Analise::Invalido);
        assert_eq!(parse_decimal("12x", dec!(3)), dec!(3));
    }

    #[test]
    fn decimal_fora_do_limite_e_invalido() {
        assert!(analisar_decimal("1000000000000000000").is_invalido());
        assert_eq!(
            analisar_decimal("999999999999999999,99"),
            Analise::Valor(dec!(999999999999999999.99))
        );
    }

    #[test]
    fn data_ddmmaaaa() {
        assert_eq!(parse_data("01022024"), NaiveDate::from_ymd_opt(2024, 2, 1));
        assert_eq!(parse_data("29022023"), None);
        assert_eq!(parse_data("0102202"), None);
        assert_eq!(parse_data("010220245"), None);
        assert_eq!(parse_data("01-02-24"), None);
        assert_eq!(analisar_data(""), Analise::Vazio);
        assert_eq!(analisar_data("31042024"), Analise::Invalido);
    }
}
