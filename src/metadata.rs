use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

// --- Tabelas de Referência ---

/// Modelos de documento escriturados no registro C100 (Tabela 4.1.1).
///
/// Os demais modelos da tabela têm registros próprios (C500, D100, ...)
/// e não chegam à validação de devoluções.
pub fn get_modelo_do_c100(cod_mod: &str) -> &'static str {
    match cod_mod.trim() {
        "01" => "Nota Fiscal modelo 1/1A",
        "1B" => "Nota Fiscal Avulsa",
        "04" => "Nota Fiscal de Produtor",
        "55" => "NF-e",
        "65" => "NFC-e",
        _ => "Modelo alheio ao C100",
    }
}

/// NF-e e NFC-e: a chave de acesso (44 dígitos) é obrigatória e é por ela
/// que se consulta a finalidade (finNFe).
pub fn modelo_com_chave_de_acesso(cod_mod: &str) -> bool {
    matches!(cod_mod.trim(), "55" | "65")
}

/// Sigla da UF a partir dos dois primeiros dígitos do código IBGE do município.
pub fn get_uf_do_municipio(cod_mun: &str) -> Option<&'static str> {
    let uf = match cod_mun.trim().get(0..2)? {
        "11" => "RO",
        "12" => "AC",
        "13" => "AM",
        "14" => "RR",
        "15" => "PA",
        "16" => "AP",
        "17" => "TO",
        "21" => "MA",
        "22" => "PI",
        "23" => "CE",
        "24" => "RN",
        "25" => "PB",
        "26" => "PE",
        "27" => "AL",
        "28" => "SE",
        "29" => "BA",
        "31" => "MG",
        "32" => "ES",
        "33" => "RJ",
        "35" => "SP",
        "41" => "PR",
        "42" => "SC",
        "43" => "RS",
        "50" => "MS",
        "51" => "MT",
        "52" => "GO",
        "53" => "DF",
        _ => return None,
    };
    Some(uf)
}

/// Tipo de ajuste da apuração do ICMS (3º caractere do código do E111).
pub fn get_tipo_de_ajuste(cod_aj_apur: &str) -> Option<&'static str> {
    let descricao = match cod_aj_apur.chars().nth(2)? {
        '0' => "0 – Outros débitos",
        '1' => "1 – Estorno de créditos",
        '2' => "2 – Outros créditos",
        '3' => "3 – Estorno de débitos",
        '4' => "4 – Deduções do imposto apurado",
        '5' => "5 – Débito especial",
        _ => return None,
    };
    Some(descricao)
}

/// NCMs com redução de 60% nas alíquotas de IBS/CBS (LC 214/2025, Anexo XVII).
/// Construção civil e materiais correlatos.
pub fn reducoes_ncm_padrao() -> BTreeMap<String, Decimal> {
    [
        ("25222000", dec!(60)), // Gesso
        ("38244000", dec!(60)), // Impermeabilizantes / produtos químicos p/ construção
    ]
    .into_iter()
    .map(|(ncm, perc)| (ncm.to_string(), perc))
    .collect()
}
