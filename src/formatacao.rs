use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::{Apuracao, ResumoProduto, analisar_decimal};

/// Separador de milhar com ponto: 1234567 -> "1.234.567".
pub fn fmt_milhares(n: usize) -> String {
    agrupar_milhares(&n.to_string())
}

/// Insere o ponto a cada três dígitos, da direita para a esquerda.
fn agrupar_milhares(digitos: &str) -> String {
    let len = digitos.len();
    let mut result = String::with_capacity(len + len / 3);

    digitos.chars().enumerate().for_each(|(i, c)| {
        if i > 0 && (len - i).is_multiple_of(3) {
            result.push('.');
        }
        result.push(c);
    });

    result
}

/// Formata um valor no padrão brasileiro, com `casas` decimais.
///
/// ```
/// use rust_decimal_macros::dec;
/// use sped_devolucoes_reforma::fmt_decimal;
///
/// assert_eq!(fmt_decimal(dec!(1234567.891), 2), "1.234.567,89");
/// assert_eq!(fmt_decimal(dec!(-0.5), 0), "-1");
/// assert_eq!(fmt_decimal(dec!(12.3), 4), "12,3000");
/// ```
pub fn fmt_decimal(valor: Decimal, casas: u32) -> String {
    let arredondado = valor.round_dp_with_strategy(casas, RoundingStrategy::MidpointAwayFromZero);
    let texto = format!("{:.*}", casas as usize, arredondado.abs());

    let (inteiro, fracao) = texto.split_once('.').unwrap_or((texto.as_str(), ""));
    let sinal = if arredondado.is_sign_negative() && !arredondado.is_zero() {
        "-"
    } else {
        ""
    };

    if fracao.is_empty() {
        format!("{sinal}{}", agrupar_milhares(inteiro))
    } else {
        format!("{sinal}{},{fracao}", agrupar_milhares(inteiro))
    }
}

/// "R$ 1.234,56"
pub fn fmt_moeda(valor: Decimal) -> String {
    format!("R$ {}", fmt_decimal(valor, 2))
}

/// "27,25%"
pub fn fmt_percentual(valor: Decimal) -> String {
    format!("{}%", fmt_decimal(valor, 2))
}

/// Lê de volta um valor exibido no padrão brasileiro ("R$ 1.234,56", "27,25%").
///
/// Os pontos só são aceitos como separadores de grupos de três dígitos.
pub fn analisar_valor_formatado(texto: &str) -> Option<Decimal> {
    let texto = texto
        .trim()
        .trim_start_matches("R$")
        .trim_end_matches('%')
        .trim();

    let (inteiro, fracao) = match texto.split_once(',') {
        Some((inteiro, fracao)) => (inteiro, Some(fracao)),
        None => (texto, None),
    };

    let digitos = inteiro.trim_start_matches('-');
    let mut grupos = digitos.split('.');
    let primeiro_ok = grupos
        .next()
        .is_some_and(|g| (1..=3).contains(&g.len()) || !digitos.contains('.'));
    if !primeiro_ok || grupos.any(|g| g.len() != 3) {
        return None;
    }

    let sem_pontos = inteiro.replace('.', "");
    let normalizado = match fracao {
        Some(fracao) => format!("{sem_pontos},{fracao}"),
        None => sem_pontos,
    };

    analisar_decimal(&normalizado).valor()
}

/// Linha de produto pronta para exibição.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProdutoFormatado {
    pub codigo: String,
    pub descricao: String,
    pub ncm: String,
    pub cfop: String,
    pub quantidade: String,
    pub valor_bruto: String,
    pub total_tributos: String,
    pub valor_liquido: String,
    pub carga_atual: String,
    pub perc_reducao: String,
    pub ibs_cbs: String,
    pub total_reforma: String,
    pub diferenca: String,
    pub valor_unitario: String,
    pub ibs_cbs_unitario: String,
    pub aliquota_icms: String,
    pub aliquota_pis: String,
    pub aliquota_cofins: String,
}

impl From<&ResumoProduto> for ProdutoFormatado {
    fn from(produto: &ResumoProduto) -> Self {
        let s = &produto.simulacao;

        Self {
            codigo: produto.codigo.clone(),
            descricao: produto.descricao.clone(),
            ncm: produto.ncm.clone(),
            cfop: produto.cfop.clone(),
            quantidade: fmt_decimal(produto.totais.quantidade, 4),
            valor_bruto: fmt_decimal(produto.totais.valor_bruto, 2),
            total_tributos: fmt_decimal(s.total_tributos, 2),
            valor_liquido: fmt_decimal(s.valor_liquido, 2),
            carga_atual: fmt_percentual(s.carga_atual),
            perc_reducao: fmt_percentual(s.perc_reducao),
            ibs_cbs: fmt_decimal(s.ibs_cbs, 2),
            total_reforma: fmt_decimal(s.total_reforma, 2),
            diferenca: fmt_decimal(s.diferenca, 2),
            valor_unitario: fmt_decimal(produto.unitarios.valor_bruto, 2),
            ibs_cbs_unitario: fmt_decimal(produto.unitarios.ibs_cbs, 2),
            aliquota_icms: fmt_decimal(produto.aliquotas.icms, 2),
            aliquota_pis: fmt_decimal(produto.aliquotas.pis, 4),
            aliquota_cofins: fmt_decimal(produto.aliquotas.cofins, 4),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApuracaoFormatada {
    pub debitos_atual: String,
    pub creditos_atual: String,
    pub resultado_atual: String,
    pub carga_atual: String,
    pub debitos_reforma: String,
    pub creditos_reforma: String,
    pub resultado_reforma: String,
    pub carga_reforma: String,
}

impl From<&Apuracao> for ApuracaoFormatada {
    fn from(apuracao: &Apuracao) -> Self {
        Self {
            debitos_atual: fmt_moeda(apuracao.debitos_atual),
            creditos_atual: fmt_moeda(apuracao.creditos_atual),
            resultado_atual: fmt_moeda(apuracao.resultado_atual),
            carga_atual: fmt_percentual(apuracao.carga_atual),
            debitos_reforma: fmt_moeda(apuracao.debitos_reforma),
            creditos_reforma: fmt_moeda(apuracao.creditos_reforma),
            resultado_reforma: fmt_moeda(apuracao.resultado_reforma),
            carga_reforma: fmt_percentual(apuracao.carga_reforma),
        }
    }
}
